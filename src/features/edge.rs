use super::schema::EDGE_LEN;
use super::signal::{self, Border, Plane};
use crate::error::FeatureError;

const CANNY_LOW: f64 = 50.0;
const CANNY_HIGH: f64 = 150.0;

/// [edge_density, laplacian_var, grad_mean, grad_std]
pub fn extract(gray: &Plane) -> Result<[f32; EDGE_LEN], FeatureError> {
    if gray.is_empty() {
        return Err(FeatureError::NoSamples("edge"));
    }

    let edges = signal::canny(gray, CANNY_LOW, CANNY_HIGH);
    let edge_density = edges.iter().filter(|&&e| e).count() as f64 / edges.len() as f64;

    let laplacian_var = signal::variance(&signal::laplacian(gray).data);

    let (gx, gy) = signal::sobel(gray, Border::Reflect101);
    let magnitude = gx.zip_map(&gy, |a, b| (a * a + b * b).sqrt());

    Ok([
        edge_density as f32,
        laplacian_var as f32,
        signal::mean(&magnitude.data) as f32,
        signal::std_dev(&magnitude.data) as f32,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_plane_has_no_edges() {
        let gray = Plane {
            width: 32,
            height: 32,
            data: vec![128.0; 32 * 32],
        };
        assert_eq!(extract(&gray).unwrap(), [0.0; EDGE_LEN]);
    }

    #[test]
    fn checkerboard_is_edgy_and_sharp() {
        let mut gray = Plane::new(32, 32);
        for y in 0..32 {
            for x in 0..32 {
                gray.data[y * 32 + x] = if (x / 4 + y / 4) % 2 == 0 { 0.0 } else { 255.0 };
            }
        }
        let [density, lap, grad_mean, _] = extract(&gray).unwrap();
        assert!(density > 0.1);
        assert!(lap > 500.0);
        assert!(grad_mean > 0.0);
    }
}
