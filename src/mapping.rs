//! Client-facing model names → backend model names.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ModelMapper {
    models: HashMap<String, String>,
}

impl ModelMapper {
    pub fn new(models: HashMap<String, String>) -> Self {
        Self { models }
    }

    /// Resolve `name`, returning the backend name and whether a mapping applied.
    /// Unmapped names pass through unchanged.
    #[must_use]
    pub fn lookup(&self, name: &str) -> (String, bool) {
        match self.models.get(name) {
            Some(mapped) => (mapped.clone(), true),
            None => (name.to_string(), false),
        }
    }

    /// Client model names with an explicit mapping, sorted.
    pub fn client_models(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> ModelMapper {
        ModelMapper::new(HashMap::from([(
            "claude-sonnet-4".to_string(),
            "claude-opus-4".to_string(),
        )]))
    }

    #[test]
    fn test_mapped_model() {
        assert_eq!(
            mapper().lookup("claude-sonnet-4"),
            ("claude-opus-4".to_string(), true)
        );
    }

    #[test]
    fn test_unmapped_model_passes_through() {
        assert_eq!(
            mapper().lookup("some-unknown-model"),
            ("some-unknown-model".to_string(), false)
        );
    }

    #[test]
    fn test_client_models_sorted() {
        let m = ModelMapper::new(HashMap::from([
            ("b".to_string(), "x".to_string()),
            ("a".to_string(), "y".to_string()),
        ]));
        assert_eq!(m.client_models(), vec!["a", "b"]);
        assert_eq!(m.len(), 2);
    }
}
