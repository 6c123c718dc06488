use std::collections::BTreeMap;

use serde_yaml::Mapping;

use crate::backend::htcondor::HtcondorBackend;
use crate::backend::spacehpc::SpacehpcBackend;
use crate::backend::{Backend, Generator};
use crate::common::error::SubmitError;
use crate::config::BackendSchema;

type BackendFactory = fn(&Mapping) -> crate::Result<Box<dyn Generator>>;

/// Schema and generator of a single backend.
pub struct BackendEntry {
    name: &'static str,
    factory: BackendFactory,
}

impl BackendEntry {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Validates `merged` with the backend schema and returns a generator bound to the
    /// resulting configuration.
    pub fn instantiate(&self, merged: &Mapping) -> crate::Result<Box<dyn Generator>> {
        (self.factory)(merged)
    }
}

fn create_backend<B: Backend>(merged: &Mapping) -> crate::Result<Box<dyn Generator>> {
    let config = B::Config::from_merged(merged)?;
    log::debug!("Validated {} configuration: {:?}", B::NAME, config);
    Ok(Box::new(B::new(config)))
}

/// Maps backend names to their implementations.
#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<&'static str, BackendEntry>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all backends shipped with this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register::<HtcondorBackend>();
        registry.register::<SpacehpcBackend>();
        registry
    }

    /// Registers `B` under [`Backend::NAME`], replacing a previous backend of the same name.
    pub fn register<B: Backend>(&mut self) {
        debug_assert_eq!(B::NAME, B::NAME.to_lowercase());
        self.backends.insert(
            B::NAME,
            BackendEntry {
                name: B::NAME,
                factory: create_backend::<B>,
            },
        );
    }

    /// Finds a backend by name, ignoring case and surrounding whitespace.
    pub fn resolve(&self, name: &str) -> crate::Result<&BackendEntry> {
        let normalized = name.trim().to_lowercase();
        self.backends
            .get(normalized.as_str())
            .ok_or_else(|| SubmitError::UnknownBackend {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.backends.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::BackendRegistry;
    use crate::backend::{ArtifactWriter, Backend, Generator};
    use crate::common::error::SubmitError;
    use crate::config::{BackendSchema, BaseConfig};
    use serde_yaml::Mapping;
    use std::path::PathBuf;

    #[derive(Debug)]
    struct EchoConfig {
        base: BaseConfig,
    }

    impl BackendSchema for EchoConfig {
        fn from_merged(merged: &Mapping) -> crate::Result<Self> {
            Ok(Self {
                base: BaseConfig::parse(merged)?,
            })
        }
    }

    #[derive(Debug)]
    struct EchoBackend {
        config: EchoConfig,
    }

    impl Generator for EchoBackend {
        fn generate(&self, writer: &ArtifactWriter) -> crate::Result<PathBuf> {
            writer.write("echo.sh", self.config.base.executable(), 0o755)
        }
    }

    impl Backend for EchoBackend {
        const NAME: &'static str = "echo";
        type Config = EchoConfig;

        fn new(config: Self::Config) -> Self {
            Self { config }
        }
    }

    #[test]
    fn test_builtin_names() {
        let registry = BackendRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["htcondor", "spacehpc"]);
    }

    #[test]
    fn test_resolve_case_insensitive() {
        let registry = BackendRegistry::with_builtin();
        assert_eq!(registry.resolve("HTCondor").unwrap().name(), "htcondor");
        assert_eq!(registry.resolve(" spaceHPC ").unwrap().name(), "spacehpc");
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = BackendRegistry::with_builtin();
        match registry.resolve("nonexistent") {
            Err(SubmitError::UnknownBackend { name, available }) => {
                assert_eq!(name, "nonexistent");
                assert_eq!(available, "htcondor, spacehpc");
            }
            _ => panic!("Expected unknown backend"),
        }
    }

    #[test]
    fn test_register_custom_backend() {
        let mut registry = BackendRegistry::new();
        assert!(registry.resolve("echo").is_err());
        registry.register::<EchoBackend>();

        let merged: Mapping = serde_yaml::from_str(
            "{project_dir: /p, data_dir: /d, output_dir: /o, image: /i.sif, executable: x}",
        )
        .unwrap();
        let generator = registry.resolve("ECHO").unwrap().instantiate(&merged).unwrap();

        let dir = tempfile::TempDir::with_prefix("hpc").unwrap();
        let writer = ArtifactWriter::new(dir.path()).unwrap();
        let path = generator.generate(&writer).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "x");
    }

    #[test]
    fn test_instantiate_validates() {
        let registry = BackendRegistry::with_builtin();
        let merged: Mapping = serde_yaml::from_str(
            "{project_dir: /p, data_dir: /d, output_dir: /o, image: /i.sif, executable: x}",
        )
        .unwrap();
        assert!(matches!(
            registry.resolve("htcondor").unwrap().instantiate(&merged),
            Err(SubmitError::MissingRequiredKey(key)) if key == "htcondor.pool"
        ));
    }
}
