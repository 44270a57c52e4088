use std::time::Instant;

use env_logger::Builder;
use image::Luma;
use log::info;

use cell_detect::{visualize_mask, watershed_edge, CellImage};

fn main() {
    Builder::from_default_env().format_timestamp_nanos().init();

    // Synthetic calcium-imaging-like frame: a dark cell of radius 15 on a
    // bright background, with a mild ripple so the edges are not perfectly
    // clean.
    let image = CellImage::from_fn(50, 50, |x, y| {
        let dx = x as f32 - 25.0;
        let dy = y as f32 - 25.0;
        let base = if dx * dx + dy * dy <= 225.0 { 0.2 } else { 0.9 };
        let ripple = 0.05 * ((x as f32 * 0.7).sin() + (y as f32 * 0.9).cos());
        Luma([base + ripple])
    });

    info!("start detection");

    let instance = Instant::now();

    let mask = watershed_edge(&image, 2, true, 1).unwrap();

    let elapsed = instance.elapsed();
    info!("detection took: {elapsed:?}");

    let cell_pixels = mask.pixels().filter(|p| p[0] != 0).count();
    info!("cell mask covers {cell_pixels} pixels");

    mask.save("cell_mask.png").unwrap();

    let overlay = visualize_mask(&image, &mask);
    overlay.save("cell_overlay.png").unwrap();

    info!("wrote cell_mask.png and cell_overlay.png");
}
