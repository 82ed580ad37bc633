use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use qrcode::{QrCode, types::Color};

const SCALE: usize = 8;
const MARGIN: usize = 4;

/// Renders a pairing payload as an `image/svg+xml` data URL.
pub(crate) fn render_data_url(payload: &str) -> Option<String> {
    let code = QrCode::new(payload).ok()?;
    let width = code.width();
    let size = (width + MARGIN * 2) * SCALE;

    if size == 0 {
        return None;
    }

    let mut path = String::new();
    for y in 0..width {
        for x in 0..width {
            if code[(x, y)] != Color::Dark {
                continue;
            }
            let px = (x + MARGIN) * SCALE;
            let py = (y + MARGIN) * SCALE;
            path.push_str(&format!("M{px} {py}h{SCALE}v{SCALE}h-{SCALE}z"));
        }
    }

    let svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{size}" height="{size}" viewBox="0 0 {size} {size}"><rect width="100%" height="100%" fill="#ffffff"/><path fill="#000000" d="{path}"/></svg>"##
    );

    Some(format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg)))
}
