//! Configuration of a patch run.

/// What to patch and which entries to add.
///
/// The defaults target the game's `Starter.Awake` bootstrap method and register the two
/// game assemblies that mods need to reference.
///
/// # Examples
///
/// ```rust
/// use cilpatch::PatchConfig;
///
/// let config = PatchConfig::default().with_entries(["Assembly-CSharp.dll", "MyMod.dll"]);
/// assert_eq!(config.type_name, "Starter");
/// assert_eq!(config.entries.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchConfig {
    /// Top-level type holding the target method, by simple or full name
    pub type_name: String,
    /// The target method
    pub method_name: String,
    /// Callee of the unique `call` before which entries are stored
    pub injection_member: String,
    /// Callee of the unique `call` followed by the array-size constant
    pub array_size_member: String,
    /// Entries stored at indices 1..=n
    pub entries: Vec<String>,
}

impl Default for PatchConfig {
    fn default() -> Self {
        PatchConfig {
            type_name: "Starter".to_string(),
            method_name: "Awake".to_string(),
            injection_member: "SetAdditionalAssemblies".to_string(),
            array_size_member: "add_eventLogMessage".to_string(),
            entries: vec![
                "Assembly-CSharp.dll".to_string(),
                "ColossalManaged.dll".to_string(),
            ],
        }
    }
}

impl PatchConfig {
    /// Sets the type that holds the target method.
    #[must_use]
    pub fn with_type_name(mut self, name: impl Into<String>) -> Self {
        self.type_name = name.into();
        self
    }

    /// Sets the target method.
    #[must_use]
    pub fn with_method_name(mut self, name: impl Into<String>) -> Self {
        self.method_name = name.into();
        self
    }

    /// Sets the callee that marks the injection location.
    #[must_use]
    pub fn with_injection_member(mut self, name: impl Into<String>) -> Self {
        self.injection_member = name.into();
        self
    }

    /// Sets the callee that precedes the array-size constant.
    #[must_use]
    pub fn with_array_size_member(mut self, name: impl Into<String>) -> Self {
        self.array_size_member = name.into();
        self
    }

    /// Replaces the entries to add.
    #[must_use]
    pub fn with_entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries = entries.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PatchConfig::default();

        assert_eq!(config.method_name, "Awake");
        assert_eq!(config.injection_member, "SetAdditionalAssemblies");
        assert_eq!(config.array_size_member, "add_eventLogMessage");
        assert_eq!(config.entries, ["Assembly-CSharp.dll", "ColossalManaged.dll"]);
    }

    #[test]
    fn overrides() {
        let config = PatchConfig::default()
            .with_type_name("Loader")
            .with_method_name("Start")
            .with_injection_member("Register")
            .with_array_size_member("Log")
            .with_entries(Vec::<String>::new());

        assert_eq!(config.type_name, "Loader");
        assert_eq!(config.method_name, "Start");
        assert_eq!(config.injection_member, "Register");
        assert_eq!(config.array_size_member, "Log");
        assert!(config.entries.is_empty());
    }
}
