use env_logger::Builder;
use image::{GrayImage, Luma};
use log::info;

use cell_detect::{norm, radial_sobel, CellImage};

fn main() {
    Builder::from_default_env().format_timestamp_nanos().init();

    // Dark cell on a bright background.
    let image = CellImage::from_fn(64, 64, |x, y| {
        let dx = x as f32 - 32.0;
        let dy = y as f32 - 32.0;
        Luma([if dx * dx + dy * dy <= 18.0 * 18.0 { 0.1 } else { 0.8 }])
    });

    let response = radial_sobel(&image, 2).unwrap();

    let (mut min, mut max) = (f32::INFINITY, f32::NEG_INFINITY);
    for p in response.pixels() {
        min = min.min(p[0]);
        max = max.max(p[0]);
    }
    info!("radial edge response range: [{min:.3}, {max:.3}]");

    // Rescale the signed response to 8 bits for inspection.
    let display = norm(&response, 0.0, 100.0).unwrap();
    let display = GrayImage::from_raw(
        display.width(),
        display.height(),
        display
            .as_raw()
            .iter()
            .map(|v| (v * 255.0).round() as u8)
            .collect(),
    )
    .unwrap();
    display.save("radial_edges.png").unwrap();

    info!("wrote radial_edges.png");
}
