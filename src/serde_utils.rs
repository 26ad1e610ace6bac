//! Shared serialization helpers.

/// Serialize a possibly infinite `f64` as `null` when non-finite.
///
/// JSON has no infinity; the Poisson limit of the dispersion parameter is
/// carried as `f64::INFINITY` in memory and as `null` on the wire.
pub mod infinite_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(val: &f64, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if val.is_finite() {
            s.serialize_some(val)
        } else {
            s.serialize_none()
        }
    }

    pub fn deserialize<'de, D>(d: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::INFINITY))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super::infinite_as_null")]
        r: f64,
    }

    #[test]
    fn test_infinity_roundtrips_through_null() {
        let json = serde_json::to_string(&Holder { r: f64::INFINITY }).unwrap();
        assert_eq!(json, r#"{"r":null}"#);
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert!(back.r.is_infinite());

        let json = serde_json::to_string(&Holder { r: 4.0 }).unwrap();
        assert_eq!(json, r#"{"r":4.0}"#);
    }
}
