use thiserror::Error;

use super::LatLng;

const PRECISION: f64 = 1e5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolylineError {
    #[error("invalid polyline character {ch:?} at byte {index}")]
    InvalidChar { ch: char, index: usize },

    #[error("polyline ends in the middle of a value")]
    Truncated,

    #[error("polyline has a latitude without a longitude")]
    Unpaired,
}

/// Decode an encoded polyline (precision 1e5) into coordinates.
pub fn decode_polyline(encoded: &str) -> Result<Vec<LatLng>, PolylineError> {
    let mut values = Vec::new();
    let mut shift = 0u32;
    let mut acc: i64 = 0;
    let mut pending = false;

    for (index, ch) in encoded.char_indices() {
        let code = ch as u32;
        if !(63..=126).contains(&code) || shift > 30 {
            return Err(PolylineError::InvalidChar { ch, index });
        }
        let chunk = i64::from(code - 63);
        acc |= (chunk & 0x1f) << shift;
        shift += 5;
        pending = true;
        if chunk < 0x20 {
            let delta = if acc & 1 == 1 { !(acc >> 1) } else { acc >> 1 };
            values.push(delta);
            acc = 0;
            shift = 0;
            pending = false;
        }
    }

    if pending {
        return Err(PolylineError::Truncated);
    }
    if values.len() % 2 != 0 {
        return Err(PolylineError::Unpaired);
    }

    let mut lat = 0i64;
    let mut lng = 0i64;
    Ok(values
        .chunks(2)
        .map(|pair| {
            lat += pair[0];
            lng += pair[1];
            LatLng::new(lat as f64 / PRECISION, lng as f64 / PRECISION)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: LatLng, lat: f64, lng: f64) -> bool {
        (a.lat - lat).abs() < 1e-9 && (a.lng - lng).abs() < 1e-9
    }

    #[test]
    fn decodes_reference_polyline() {
        let points = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@").unwrap();
        assert_eq!(points.len(), 3);
        assert!(close(points[0], 38.5, -120.2));
        assert!(close(points[1], 40.7, -120.95));
        assert!(close(points[2], 43.252, -126.453));
    }

    #[test]
    fn empty_is_empty() {
        assert!(decode_polyline("").unwrap().is_empty());
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert_eq!(decode_polyline("_p~iF~ps|"), Err(PolylineError::Truncated));
    }

    #[test]
    fn lone_latitude_is_rejected() {
        assert_eq!(decode_polyline("_p~iF"), Err(PolylineError::Unpaired));
    }

    #[test]
    fn invalid_character_is_rejected() {
        assert!(matches!(
            decode_polyline("_p~iF ps|U"),
            Err(PolylineError::InvalidChar { ch: ' ', index: 5 })
        ));
    }
}
