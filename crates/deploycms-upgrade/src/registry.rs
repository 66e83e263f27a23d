use std::sync::Arc;

use deploycms_common::{Error, Result};
use tracing::info;

use crate::script::UpgradeScript;

/// Upgrade scripts in the order a deployment applies them.
#[derive(Default)]
pub struct ScriptRegistry {
    scripts: Vec<Arc<dyn UpgradeScript>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `script`. Names are idempotency keys, so duplicates are rejected.
    pub fn register(&mut self, script: Box<dyn UpgradeScript>) -> Result<()> {
        let name = script.metadata().name.clone();
        if name.trim().is_empty() {
            return Err(Error::Config("upgrade script name cannot be empty".into()));
        }
        if self.get(&name).is_some() {
            return Err(Error::Config(format!(
                "upgrade script '{name}' is already registered"
            )));
        }

        info!("registered upgrade script: {}", name);
        self.scripts.push(Arc::from(script));
        Ok(())
    }

    pub fn with_script(mut self, script: Box<dyn UpgradeScript>) -> Result<Self> {
        self.register(script)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn UpgradeScript>> {
        self.scripts.iter().find(|s| s.metadata().name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn UpgradeScript>> {
        self.scripts.iter()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::ScriptRegistry;
    use crate::script::{ScriptMetadata, UpgradeScript};
    use async_trait::async_trait;
    use deploycms_common::Error;
    use deploycms_db::UpgradeLogRepository;

    struct NamedScript(ScriptMetadata);

    #[async_trait]
    impl UpgradeScript for NamedScript {
        fn metadata(&self) -> &ScriptMetadata {
            &self.0
        }

        async fn run_script(&self, _logs: &dyn UpgradeLogRepository) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    fn script(name: &str) -> Box<dyn UpgradeScript> {
        Box::new(NamedScript(ScriptMetadata::once(name)))
    }

    #[test]
    fn keeps_registration_order() {
        let registry = ScriptRegistry::new()
            .with_script(script("Site.Second"))
            .and_then(|r| r.with_script(script("Site.First")))
            .expect("registration should succeed");

        let names: Vec<&str> = registry.iter().map(|s| s.metadata().name.as_str()).collect();
        assert_eq!(names, vec!["Site.Second", "Site.First"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = ScriptRegistry::new();
        registry
            .register(script("Site.SeedReferenceData"))
            .expect("first registration should succeed");

        let err = registry
            .register(script("Site.SeedReferenceData"))
            .expect_err("duplicate must be rejected");

        assert!(matches!(err, Error::Config(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_blank_names() {
        let mut registry = ScriptRegistry::new();
        assert!(registry.register(script("  ")).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn get_finds_by_name() {
        let registry = ScriptRegistry::new()
            .with_script(script("Site.SeedReferenceData"))
            .expect("registration should succeed");

        assert!(registry.get("Site.SeedReferenceData").is_some());
        assert!(registry.get("Site.Missing").is_none());
    }
}
