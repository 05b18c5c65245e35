/// Typed option value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::I64(v)
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        ParamValue::U64(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::F64(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

/// Broker options, keyed by their Kafka-style dotted names
/// (`log.segment.bytes`, `enable.auto.commit`, ...).
///
/// Built by whoever loads configuration (TOML, JSON over the wire, tests)
/// and handed to `Broker::configure`. Insertion order is preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigValues {
    entries: Vec<(String, ParamValue)>,
}

impl ConfigValues {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build from a JSON object. Nested objects/arrays and nulls are skipped.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut out = Self::new();
        let Some(map) = value.as_object() else {
            return out;
        };
        for (name, v) in map {
            let param = match v {
                serde_json::Value::Bool(b) => ParamValue::Bool(*b),
                serde_json::Value::Number(n) => {
                    if let Some(u) = n.as_u64() {
                        ParamValue::U64(u)
                    } else if let Some(i) = n.as_i64() {
                        ParamValue::I64(i)
                    } else if let Some(f) = n.as_f64() {
                        ParamValue::F64(f)
                    } else {
                        continue;
                    }
                }
                serde_json::Value::String(s) => ParamValue::Str(s.clone()),
                _ => continue,
            };
            out.set(name.clone(), param);
        }
        out
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(name, value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: ParamValue) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == &name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn merge(&mut self, other: &ConfigValues) {
        for (name, value) in &other.entries {
            self.set(name.clone(), value.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(ParamValue::Bool(v)) => Some(*v),
            // Kafka clients pass booleans as strings.
            Some(ParamValue::Str(s)) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ParamValue::I64(v)) => Some(*v),
            Some(ParamValue::U64(v)) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.get(name) {
            Some(ParamValue::U64(v)) => Some(*v),
            // Most config formats lack unsigned integers; accept non-negative i64.
            Some(ParamValue::I64(v)) if *v >= 0 => Some(*v as u64),
            Some(ParamValue::Str(s)) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(ParamValue::F64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ParamValue::Str(v)) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_existing_key() {
        let mut values = ConfigValues::new().with("log.segment.bytes", 10u64);
        values.set("log.segment.bytes", ParamValue::U64(20));
        assert_eq!(values.len(), 1);
        assert_eq!(values.get_u64("log.segment.bytes"), Some(20));
    }

    #[test]
    fn merge_overlays_other() {
        let mut base = ConfigValues::new()
            .with("enable.auto.commit", true)
            .with("log.dirs", "/a");
        base.merge(&ConfigValues::new().with("log.dirs", "/b").with("x.custom", 1i64));
        assert_eq!(base.get_bool("enable.auto.commit"), Some(true));
        assert_eq!(base.get_str("log.dirs"), Some("/b"));
        assert_eq!(base.get_i64("x.custom"), Some(1));
    }

    #[test]
    fn from_json_maps_scalar_types() {
        let json = serde_json::json!({
            "log.segment.bytes": 2048,
            "enable.auto.commit": "false",
            "auto.offset.reset": "latest",
            "nested": {"a": 1},
            "ratio": 0.5,
        });
        let values = ConfigValues::from_json(&json);
        assert_eq!(values.get_u64("log.segment.bytes"), Some(2048));
        assert_eq!(values.get_bool("enable.auto.commit"), Some(false));
        assert_eq!(values.get_str("auto.offset.reset"), Some("latest"));
        assert_eq!(values.get_f64("ratio"), Some(0.5));
        assert!(values.get("nested").is_none());
    }

    #[test]
    fn get_u64_rejects_negative() {
        let values = ConfigValues::new().with("log.segment.bytes", -1i64);
        assert_eq!(values.get_u64("log.segment.bytes"), None);
    }
}
