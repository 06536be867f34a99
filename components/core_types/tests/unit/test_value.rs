//! Unit tests for Value enum

use core_types::{JsError, Value};
use std::collections::BTreeMap;

#[cfg(test)]
mod value_creation_tests {
    use super::*;

    #[test]
    fn test_value_from_primitives() {
        assert!(matches!(Value::from(true), Value::Boolean(true)));
        assert!(matches!(Value::from(42), Value::Smi(42)));
        assert!(matches!(Value::from(1.5), Value::Double(_)));
        assert_eq!(Value::from("hi"), Value::String("hi".to_string()));
    }

    #[test]
    fn test_value_from_collections() {
        let array = Value::from(vec![Value::Smi(1), Value::Smi(2)]);
        assert_eq!(array.as_array().map(|a| a.len()), Some(2));

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Smi(1));
        assert!(matches!(Value::from(map), Value::Object(_)));
    }
}

#[cfg(test)]
mod truthiness_tests {
    use super::*;

    #[test]
    fn test_falsy_values() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(!Value::Smi(0).is_truthy());
        assert!(!Value::Double(0.0).is_truthy());
        assert!(!Value::Double(-0.0).is_truthy());
        assert!(!Value::Double(f64::NAN).is_truthy());
        assert!(!Value::from("").is_truthy());
    }

    #[test]
    fn test_truthy_values() {
        assert!(Value::Smi(-1).is_truthy());
        assert!(Value::Double(0.5).is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
        assert!(Value::Object(BTreeMap::new()).is_truthy());
        assert!(Value::from(JsError::error("x")).is_truthy());
    }
}

#[cfg(test)]
mod conversion_tests {
    use super::*;

    #[test]
    fn test_double_to_string() {
        assert_eq!(Value::Double(42.0).to_string(), "42");
        assert_eq!(Value::Double(3.25).to_string(), "3.25");
        assert_eq!(Value::Double(f64::INFINITY).to_string(), "Infinity");
        assert_eq!(Value::Double(f64::NEG_INFINITY).to_string(), "-Infinity");
        assert_eq!(Value::Double(f64::NAN).to_string(), "NaN");
    }

    #[test]
    fn test_object_and_error_to_string() {
        assert_eq!(Value::Object(BTreeMap::new()).to_string(), "[object Object]");
        assert_eq!(Value::from(JsError::type_error("bad")).to_string(), "TypeError: bad");
    }

    #[test]
    fn test_as_number() {
        assert_eq!(Value::Smi(3).as_number(), Some(3.0));
        assert_eq!(Value::Double(-1.5).as_number(), Some(-1.5));
        assert_eq!(Value::from("3").as_number(), None);
    }

    #[test]
    fn test_type_of() {
        assert_eq!(Value::Boolean(true).type_of(), "boolean");
        assert_eq!(Value::Smi(1).type_of(), "number");
        assert_eq!(Value::Array(vec![]).type_of(), "object");
    }

    #[test]
    fn test_large_json_numbers_become_doubles() {
        let value = Value::from(serde_json::json!(10_000_000_000_i64));
        assert_eq!(value, Value::Double(10_000_000_000.0));
    }

    #[test]
    fn test_non_finite_double_serializes_as_null() {
        assert_eq!(
            Value::Double(f64::NAN).to_json(),
            Some(serde_json::Value::Null)
        );
    }
}

#[cfg(test)]
mod trait_tests {
    use super::*;

    #[test]
    fn test_value_clone_and_eq() {
        let val = Value::Array(vec![Value::Smi(1), Value::from("x")]);
        assert_eq!(val.clone(), val);
        assert_ne!(Value::Smi(1), Value::Double(1.0));
    }

    #[test]
    fn test_value_debug() {
        assert_eq!(format!("{:?}", Value::Smi(7)), "Smi(7)");
        assert_eq!(format!("{:?}", Value::Undefined), "Undefined");
    }
}
