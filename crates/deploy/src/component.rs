//! Static declaration of the components to deploy and the wiring between them.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Default initializer called on a proxied component's logic through its proxy.
pub const DEFAULT_INITIALIZER: &str = "initialize";

/// How a component lands on chain.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DeploymentKind {
    /// A single contract creation whose address is final.
    #[default]
    Direct,
    /// A logic contract deployed behind an upgradeable proxy; the proxy address is the
    /// component's address of record.
    ProxiedUpgradeable,
}

/// A constructor or initializer argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgSpec {
    /// The deployed address of another component.
    AddressOf { address_of: String },
    /// A literal, coerced to the ABI parameter type at submission time.
    Literal(#[serde(deserialize_with = "literal_from_scalar")] String),
}

/// Accept TOML/JSON strings, integers, floats and booleans as literal arguments.
fn literal_from_scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported literal argument: {other}"
        ))),
    }
}

impl ArgSpec {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn address_of(component: impl Into<String>) -> Self {
        Self::AddressOf {
            address_of: component.into(),
        }
    }

    /// The component this argument depends on, if it is a reference.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::AddressOf { address_of } => Some(address_of),
            Self::Literal(_) => None,
        }
    }
}

/// A single deployable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Unique name of the component.
    pub name: String,
    /// Contract name of the artifact to deploy. Defaults to the component name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Deployment kind.
    #[serde(default)]
    pub kind: DeploymentKind,
    /// Components that must be statically linked as libraries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    /// Constructor arguments, or initializer arguments for proxied components.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ArgSpec>,
    /// Initializer method for proxied components.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer: Option<String>,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifact: None,
            kind: DeploymentKind::Direct,
            links: Vec::new(),
            args: Vec::new(),
            initializer: None,
        }
    }

    pub fn artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    pub fn proxied(mut self) -> Self {
        self.kind = DeploymentKind::ProxiedUpgradeable;
        self
    }

    pub fn link(mut self, library: impl Into<String>) -> Self {
        self.links.push(library.into());
        self
    }

    pub fn arg(mut self, arg: ArgSpec) -> Self {
        self.args.push(arg);
        self
    }

    pub fn initializer(mut self, method: impl Into<String>) -> Self {
        self.initializer = Some(method.into());
        self
    }

    pub fn artifact_name(&self) -> &str {
        self.artifact.as_deref().unwrap_or(&self.name)
    }

    pub fn initializer_name(&self) -> &str {
        self.initializer.as_deref().unwrap_or(DEFAULT_INITIALIZER)
    }

    /// Components referenced by address in the argument list.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(ArgSpec::reference)
    }

    /// Every component this one must wait for: links first, then argument references,
    /// in declaration order and without duplicates.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        for dep in self.links.iter().map(String::as_str).chain(self.references()) {
            if !deps.iter().any(|d| d == dep) {
                deps.push(dep.to_string());
            }
        }
        deps
    }
}

/// A post-deployment call that hands `source`'s address to `target` via `setter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WiringEdge {
    pub source: String,
    pub target: String,
    /// Method name (`setToken`) or full signature (`setToken(address)`).
    pub setter: String,
}

impl WiringEdge {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        setter: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            setter: setter.into(),
        }
    }
}

impl fmt::Display for WiringEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.target, self.setter, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_dedup_links_and_references() {
        let component = Component::new("Sale")
            .link("Lib")
            .arg(ArgSpec::address_of("Token"))
            .arg(ArgSpec::address_of("Lib"))
            .arg(ArgSpec::literal("42"));

        assert_eq!(component.dependencies(), vec!["Lib", "Token"]);
    }

    #[test]
    fn test_artifact_and_initializer_defaults() {
        let component = Component::new("Sale").proxied();
        assert_eq!(component.artifact_name(), "Sale");
        assert_eq!(component.initializer_name(), DEFAULT_INITIALIZER);

        let component = component.artifact("ERC721Sale").initializer("init");
        assert_eq!(component.artifact_name(), "ERC721Sale");
        assert_eq!(component.initializer_name(), "init");
    }

    #[test]
    fn test_parse_component_from_toml() {
        let component: Component = toml::from_str(
            r#"
            name = "Sale"
            kind = "proxied-upgradeable"
            links = ["Lib"]
            args = [{ address_of = "Token" }, 1000, "hello", true]
            "#,
        )
        .expect("component should parse");

        assert_eq!(component.kind, DeploymentKind::ProxiedUpgradeable);
        assert_eq!(
            component.args,
            vec![
                ArgSpec::address_of("Token"),
                ArgSpec::literal("1000"),
                ArgSpec::literal("hello"),
                ArgSpec::literal("true"),
            ]
        );
    }

    #[test]
    fn test_wiring_edge_display() {
        let edge = WiringEdge::new("Token", "Sale", "setTokenAddr");
        assert_eq!(edge.to_string(), "Sale.setTokenAddr(Token)");
    }
}
