//! Simulated cloud provider
//!
//! Fabricates deterministic physical ids and echoes inputs back as outputs,
//! so stacks can be planned and applied end to end without a cloud account.

use std::collections::BTreeSet;
use std::sync::Arc;

use declarative::{
    Attributes, KindSchema, Provider, ProviderError, ProviderRegistry, StateError, StateStore,
    Value,
};

use crate::manifest::Stack;

const REGION: &str = "us-east-1";
const ACCOUNT: &str = "000000000000";

/// Provider for one simulated resource kind
#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    kind: String,
    schema: KindSchema,
}

impl SimulatedProvider {
    pub fn new(kind: impl Into<String>, schema: KindSchema) -> Self {
        Self {
            kind: kind.into(),
            schema,
        }
    }

    /// `aws:ec2/internetGateway` -> (`ec2`, `internetgateway`)
    fn service_and_type(&self) -> (&str, String) {
        let (package, resource) = self.kind.split_once('/').unwrap_or(("", self.kind.as_str()));
        let service = package.rsplit(':').next().filter(|s| !s.is_empty()).unwrap_or("cloud");
        (service, resource.to_lowercase())
    }

    fn outputs(&self, physical_id: &str, inputs: &Attributes) -> Attributes {
        let (service, resource) = self.service_and_type();
        let mut outputs = inputs.clone();
        outputs.insert("id".into(), physical_id.into());
        outputs.insert(
            "arn".into(),
            format!("arn:aws:{service}:{REGION}:{ACCOUNT}:{resource}/{physical_id}").into(),
        );

        // Computed attributes the fixture stack exports
        match (service, resource.as_str()) {
            ("lb", "loadbalancer") => {
                outputs.insert(
                    "dns_name".into(),
                    format!("{physical_id}.{REGION}.elb.amazonaws.com").into(),
                );
            }
            ("rds", "instance") => {
                let address = format!("{physical_id}.{REGION}.rds.amazonaws.com");
                outputs.insert("endpoint".into(), format!("{address}:3306").into());
                outputs.insert("address".into(), address.into());
            }
            _ => {}
        }
        outputs
    }
}

impl Provider for SimulatedProvider {
    fn create(&self, node_id: &str, inputs: &Attributes) -> Result<Attributes, ProviderError> {
        let physical_id = physical_id(&self.kind, node_id, inputs)?;
        log::debug!("simulated create {} ({}) -> {}", node_id, self.kind, physical_id);
        Ok(self.outputs(&physical_id, inputs))
    }

    fn update(&self, physical_id: &str, inputs: &Attributes) -> Result<Attributes, ProviderError> {
        log::debug!("simulated update {} ({})", physical_id, self.kind);
        Ok(self.outputs(physical_id, inputs))
    }

    fn delete(&self, physical_id: &str) -> Result<(), ProviderError> {
        log::debug!("simulated delete {} ({})", physical_id, self.kind);
        Ok(())
    }

    fn schema(&self) -> &KindSchema {
        &self.schema
    }
}

/// Id derived from the kind, node and inputs, so a replace gets a new id
fn physical_id(kind: &str, node_id: &str, inputs: &Attributes) -> Result<String, ProviderError> {
    let encoded = serde_json::to_vec(inputs)
        .map_err(|e| ProviderError::new(format!("cannot encode inputs: {e}")))?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_bytes());
    hasher.update(&[0]);
    hasher.update(node_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(&encoded);
    let hash = hasher.finalize().to_hex();

    let prefix: String = kind
        .rsplit('/')
        .next()
        .unwrap_or(kind)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(12)
        .collect::<String>()
        .to_lowercase();
    Ok(format!("{prefix}-{}", &hash.as_str()[..17]))
}

/// Registry with a simulated provider for every declared or recorded kind
pub fn registry(stack: &Stack, store: &dyn StateStore) -> Result<ProviderRegistry, StateError> {
    let mut kinds: BTreeSet<String> = stack.declarations.iter().map(|d| d.kind.clone()).collect();
    kinds.extend(stack.kinds.keys().cloned());
    for id in store.ids()? {
        if let Some(record) = store.read(&id)? {
            kinds.insert(record.kind);
        }
    }

    let mut registry = ProviderRegistry::new();
    for kind in kinds {
        let provider = SimulatedProvider::new(kind.clone(), stack.schema(&kind));
        registry.register(kind, Arc::new(provider));
    }
    Ok(registry)
}

/// Render an output value for display, redacting sensitive fields
pub fn display_output(value: Option<&Value>, sensitive: bool) -> String {
    match value {
        _ if sensitive => "(sensitive)".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "(not applied)".to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::MemoryStore;
    use std::path::Path;

    fn inputs(cidr: &str) -> Attributes {
        [("cidr_block".to_string(), Value::from(cidr))].into_iter().collect()
    }

    #[test]
    fn test_ids_are_deterministic() {
        let provider = SimulatedProvider::new("aws:ec2/vpc", KindSchema::default());
        let a = provider.create("vpc", &inputs("10.0.0.0/16")).unwrap();
        let b = provider.create("vpc", &inputs("10.0.0.0/16")).unwrap();
        let c = provider.create("vpc", &inputs("10.1.0.0/16")).unwrap();

        assert_eq!(a["id"], b["id"]);
        assert_ne!(a["id"], c["id"]);
        assert!(a["id"].as_str().unwrap().starts_with("vpc-"));
        assert_eq!(a["cidr_block"], Value::from("10.0.0.0/16"));
    }

    #[test]
    fn test_arn_and_computed_outputs() {
        let lb = SimulatedProvider::new("aws:lb/loadBalancer", KindSchema::default());
        let outputs = lb.create("my-lb", &Attributes::new()).unwrap();
        let id = outputs["id"].as_str().unwrap().to_string();
        assert_eq!(
            outputs["arn"],
            Value::from(format!("arn:aws:lb:us-east-1:000000000000:loadbalancer/{id}"))
        );
        assert!(outputs["dns_name"].as_str().unwrap().ends_with(".elb.amazonaws.com"));

        let db = SimulatedProvider::new("aws:rds/instance", KindSchema::default());
        let outputs = db.update("db-1", &Attributes::new()).unwrap();
        assert_eq!(outputs["id"], Value::from("db-1"));
        assert!(outputs["endpoint"].as_str().unwrap().ends_with(":3306"));
    }

    #[test]
    fn test_registry_covers_recorded_kinds() {
        let stack = Stack::parse(
            r#"
[[resource]]
name = "vpc"
kind = "aws:ec2/vpc"

[kinds."aws:rds/instance"]
sensitive = ["password"]
"#,
            Path::new("stack.toml"),
        )
        .unwrap();

        let store = MemoryStore::new();
        let mut outputs = Attributes::new();
        outputs.insert("id".into(), "sg-1".into());
        store
            .write(
                "old-sg",
                declarative::StateRecord {
                    kind: "aws:ec2/securityGroup".into(),
                    inputs: Attributes::new(),
                    outputs,
                    dependencies: Vec::new(),
                    version: 1,
                },
            )
            .unwrap();

        let registry = registry(&stack, &store).unwrap();
        assert_eq!(
            registry.kinds(),
            vec!["aws:ec2/securityGroup", "aws:ec2/vpc", "aws:rds/instance"]
        );
        assert!(
            registry
                .get("aws:rds/instance")
                .unwrap()
                .schema()
                .is_sensitive("password")
        );
    }

    #[test]
    fn test_display_output() {
        assert_eq!(display_output(Some(&Value::from("db.example")), false), "db.example");
        assert_eq!(display_output(Some(&Value::Int(3306)), false), "3306");
        assert_eq!(display_output(Some(&Value::from("hunter2")), true), "(sensitive)");
        assert_eq!(display_output(None, false), "(not applied)");
    }
}
