//! Topology checks for road networks.

use super::optimize::{connected_components, line_key};
use super::{RoadLine, RoadNetwork};
use serde::Serialize;
use std::collections::HashSet;

/// Outcome of [`validate_network_topology`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub original_size: usize,
    pub issues: Vec<String>,
    pub repairs: Vec<String>,
    pub final_size: usize,
    pub components: usize,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// A line is invalid when it has a non-finite coordinate or spans no distance.
fn is_invalid(line: &RoadLine) -> bool {
    let coords = &line.geometry.0;
    coords.iter().any(|c| !c.x.is_finite() || !c.y.is_finite())
        || coords.windows(2).all(|w| w[0] == w[1])
}

/// Removes empty, invalid and duplicate lines and reports what was found.
pub fn validate_network_topology(network: &RoadNetwork) -> (RoadNetwork, ValidationReport) {
    let mut report = ValidationReport {
        original_size: network.len(),
        ..ValidationReport::default()
    };
    if network.is_empty() {
        report.issues.push("Network is empty".to_string());
        return (network.clone(), report);
    }

    let (empty, lines): (Vec<RoadLine>, Vec<RoadLine>) =
        network.iter().cloned().partition(|l| l.geometry.0.is_empty());
    if !empty.is_empty() {
        report.issues.push(format!("Found {} empty geometries", empty.len()));
        report.repairs.push("Removed empty geometries".to_string());
    }

    let (invalid, lines): (Vec<RoadLine>, Vec<RoadLine>) = lines.into_iter().partition(is_invalid);
    if !invalid.is_empty() {
        report.issues.push(format!("Found {} invalid geometries", invalid.len()));
        report.repairs.push("Removed invalid geometries".to_string());
    }

    let mut seen = HashSet::new();
    let before = lines.len();
    let lines: Vec<RoadLine> = lines
        .into_iter()
        .filter(|l| seen.insert(line_key(&l.geometry)))
        .collect();
    if lines.len() < before {
        report.issues.push(format!("Found {} duplicate geometries", before - lines.len()));
        report.repairs.push("Removed duplicate geometries".to_string());
    }

    let validated = RoadNetwork::new(lines);
    report.components = connected_components(&validated);
    if report.components > 1 {
        report
            .issues
            .push(format!("Found {} disconnected components", report.components));
        report
            .repairs
            .push("Consider using optimize_network_for_snapping() to clean".to_string());
    }
    report.final_size = validated.len();

    if !report.is_clean() {
        tracing::warn!(issues = ?report.issues, "road network topology issues");
    }
    (validated, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, line_string};

    #[test]
    fn test_clean_network() {
        let network = RoadNetwork::from_line_strings([
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
            line_string![(x: 1.0, y: 0.0), (x: 1.0, y: 1.0)],
        ]);
        let (validated, report) = validate_network_topology(&network);
        assert!(report.is_clean(), "unexpected issues: {:?}", report.issues);
        assert_eq!(report.components, 1);
        assert_eq!(validated, network);
    }

    #[test]
    fn test_repairs_are_reported() {
        let network = RoadNetwork::from_line_strings([
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
            line_string![(x: 5.0, y: 5.0), (x: 5.0, y: 5.0)],
            line_string![(x: f64::NAN, y: 0.0), (x: 1.0, y: 0.0)],
            LineString::new(vec![]),
            line_string![(x: 3.0, y: 3.0), (x: 4.0, y: 4.0)],
        ]);
        let (validated, report) = validate_network_topology(&network);

        assert_eq!(report.original_size, 6);
        assert_eq!(report.final_size, 2);
        assert_eq!(validated.len(), 2);
        assert_eq!(report.components, 2);
        assert_eq!(
            report.issues,
            vec![
                "Found 1 empty geometries",
                "Found 2 invalid geometries",
                "Found 1 duplicate geometries",
                "Found 2 disconnected components",
            ]
        );
        assert_eq!(report.repairs.len(), 4);
    }

    #[test]
    fn test_empty_network() {
        let (_, report) = validate_network_topology(&RoadNetwork::default());
        assert_eq!(report.issues, vec!["Network is empty"]);
    }
}
