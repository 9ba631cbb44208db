use crate::data_url::svg_to_data_url;

/// Marker icon edge length in pixels.
pub const ICON_SIZE: u32 = 45;

/// Camera marker with a field-of-view wedge rotated to `compass_angle` (degrees, clockwise from north).
pub fn generate_arrow_svg(compass_angle: f64) -> String {
    format!(
        r##"<svg width="200" height="200" viewBox="0 0 200 200" xmlns="http://www.w3.org/2000/svg">
    <circle cx="100" cy="100" r="40" fill="#6699FF"/>
    <g transform="rotate({compass_angle}, 100, 100)">
        <path d="M100,100 L150,50 A70,70 0 0,0 50,50 Z" fill="rgba(0,0,255,0.3)"/>
    </g>
    <rect x="80" y="86.5" width="40" height="27" fill="white"/>
    <circle cx="100" cy="99.5" r="9" fill="#6699FF" stroke="white" stroke-width="2.5"/>
    <rect x="90" y="79.5" width="20" height="7" fill="white"/>
</svg>"##
    )
}

/// [`generate_arrow_svg`] as a data URL, ready for a Leaflet `L.icon`.
pub fn generate_arrow_icon(compass_angle: f64) -> String {
    svg_to_data_url(&generate_arrow_svg(compass_angle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose};

    #[test]
    fn test_arrow_svg_rotation() {
        let svg = generate_arrow_svg(90.0);
        assert!(svg.contains("rotate(90, 100, 100)"));
        assert!(svg.starts_with("<svg"));
        assert!(generate_arrow_svg(12.5).contains("rotate(12.5, 100, 100)"));
    }

    #[test]
    fn test_arrow_icon_is_svg_data_url() {
        let url = generate_arrow_icon(45.0);
        let encoded = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let decoded = String::from_utf8(general_purpose::STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, generate_arrow_svg(45.0));
    }
}
