//! Dependency ordering and validation of a deployment configuration.
//!
//! A component depends on every library it links and every component whose address it
//! takes as an argument. The plan lists components so that each one comes after all of
//! its dependencies; ties are broken by declaration order so that the same configuration
//! always produces the same plan.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use alloy_core::json_abi::Param;
use derive_more::Deref;

use crate::{
    ArgSpec, Artifact, ArtifactResolver, Component, DeployError, DeploymentFingerprint,
    DeploymentKind, WiringEdge,
    network::{coerce_arg, resolve_initializer},
};

/// One unit of work: a component together with its resolved artifact.
#[derive(Debug, Clone)]
pub struct DeploymentStep {
    pub component: Component,
    pub artifact: Arc<Artifact>,
    /// Components that must be Confirmed before this step is submitted.
    pub dependencies: Vec<String>,
    /// Hash of the deploy-relevant inputs, see [`DeploymentFingerprint`].
    pub fingerprint: String,
}

impl DeploymentStep {
    pub fn name(&self) -> &str {
        &self.component.name
    }

    pub fn kind(&self) -> DeploymentKind {
        self.component.kind
    }
}

/// Validated, ordered deployment steps plus the wiring to apply afterwards.
#[derive(Debug, Clone, Deref)]
pub struct DeploymentPlan {
    #[deref]
    steps: Vec<DeploymentStep>,
    wiring: Vec<WiringEdge>,
}

impl DeploymentPlan {
    pub fn steps(&self) -> &[DeploymentStep] {
        &self.steps
    }

    pub fn wiring(&self) -> &[WiringEdge] {
        &self.wiring
    }

    pub fn step(&self, name: &str) -> Option<&DeploymentStep> {
        self.steps.iter().find(|step| step.name() == name)
    }

    /// Component names in deployment order.
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(DeploymentStep::name).collect()
    }
}

/// Builds [`DeploymentPlan`]s from static component declarations.
pub struct DependencyGraph;

impl DependencyGraph {
    /// Validate the configuration, resolve every artifact and order the steps.
    ///
    /// Nothing here touches the network: every error returned is a configuration error.
    pub fn build<R: ArtifactResolver>(
        components: &[Component],
        wiring: &[WiringEdge],
        unsafe_allow_linking: bool,
        resolver: &R,
    ) -> Result<DeploymentPlan, DeployError> {
        let order = Self::order(components)?;
        Self::validate_wiring_endpoints(components, wiring)?;

        let artifacts = components
            .iter()
            .map(|c| resolver.resolve(c.artifact_name()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        let by_name: HashMap<&str, &Arc<Artifact>> = components
            .iter()
            .map(|c| c.name.as_str())
            .zip(artifacts.iter())
            .collect();

        for (component, artifact) in components.iter().zip(&artifacts) {
            Self::validate_links(component, artifact, &by_name, unsafe_allow_linking)?;
            Self::validate_arguments(component, artifact)?;
        }
        for edge in wiring {
            Self::validate_setter(edge, by_name[edge.target.as_str()])?;
        }

        let steps = order
            .into_iter()
            .map(|i| {
                let component = components[i].clone();
                let artifact = artifacts[i].clone();
                let fingerprint = DeploymentFingerprint::new(&component, &artifact).compute_hash();
                DeploymentStep {
                    dependencies: component.dependencies(),
                    component,
                    artifact,
                    fingerprint,
                }
            })
            .collect();

        Ok(DeploymentPlan {
            steps,
            wiring: wiring.to_vec(),
        })
    }

    /// Topologically sort `components`, returning indices into the slice.
    ///
    /// A cycle is reported in "depends on" direction, starting and ending with the same
    /// component.
    pub fn order(components: &[Component]) -> Result<Vec<usize>, DeployError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(components.len());
        for (i, component) in components.iter().enumerate() {
            if index.insert(component.name.as_str(), i).is_some() {
                return Err(DeployError::DuplicateComponent(component.name.clone()));
            }
        }

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(components.len());
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); components.len()];
        for (i, component) in components.iter().enumerate() {
            let mut resolved = Vec::new();
            for dep in component.dependencies() {
                let &d = index
                    .get(dep.as_str())
                    .ok_or_else(|| DeployError::UnknownComponent {
                        name: dep.clone(),
                        referenced_by: format!("component `{}`", component.name),
                    })?;
                resolved.push(d);
                dependents[d].push(i);
            }
            deps.push(resolved);
        }

        let mut indegree: Vec<usize> = deps.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..components.len())
            .filter(|&i| indegree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(components.len());

        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &dependent in &dependents[i] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < components.len() {
            let cycle = Self::find_cycle(&deps, &indegree)
                .into_iter()
                .map(|i| components[i].name.clone())
                .collect();
            return Err(DeployError::Cycle { cycle });
        }

        Ok(order)
    }

    /// Walk unresolved dependencies from the first stuck component until a node repeats.
    ///
    /// Every component left with a non-zero indegree has at least one dependency that is
    /// also stuck, so the walk always closes a loop.
    fn find_cycle(deps: &[Vec<usize>], indegree: &[usize]) -> Vec<usize> {
        let stuck = |i: usize| indegree[i] > 0;
        let Some(start) = (0..deps.len()).find(|&i| stuck(i)) else {
            return Vec::new();
        };

        let mut path: Vec<usize> = Vec::new();
        let mut position: HashMap<usize, usize> = HashMap::new();
        let mut current = start;

        loop {
            if let Some(&at) = position.get(&current) {
                let mut cycle = path[at..].to_vec();
                cycle.push(current);
                return cycle;
            }
            position.insert(current, path.len());
            path.push(current);

            match deps[current].iter().copied().find(|&d| stuck(d)) {
                Some(next) => current = next,
                None => return path,
            }
        }
    }

    fn validate_wiring_endpoints(
        components: &[Component],
        wiring: &[WiringEdge],
    ) -> Result<(), DeployError> {
        let known = |name: &str| components.iter().any(|c| c.name == name);

        for edge in wiring {
            for endpoint in [&edge.source, &edge.target] {
                if !known(endpoint) {
                    return Err(DeployError::UnknownComponent {
                        name: endpoint.clone(),
                        referenced_by: format!("wiring edge {edge}"),
                    });
                }
            }
        }

        Ok(())
    }

    fn validate_links(
        component: &Component,
        artifact: &Artifact,
        artifacts: &HashMap<&str, &Arc<Artifact>>,
        unsafe_allow_linking: bool,
    ) -> Result<(), DeployError> {
        if component.kind == DeploymentKind::ProxiedUpgradeable
            && !component.links.is_empty()
            && !unsafe_allow_linking
        {
            return Err(DeployError::UnsafeLinking(component.name.clone()));
        }

        let provided = |library: &str| {
            component.links.iter().any(|link| {
                link == library
                    || artifacts
                        .get(link.as_str())
                        .is_some_and(|a| a.contract_name == library)
            })
        };

        for library in artifact.libraries() {
            if !provided(library) {
                return Err(DeployError::UnlinkedLibrary {
                    artifact: artifact.contract_name.clone(),
                    library: library.to_string(),
                });
            }
        }

        for link in &component.links {
            let used = artifacts.get(link.as_str()).is_some_and(|a| {
                artifact
                    .libraries()
                    .iter()
                    .any(|&l| l == link || l == a.contract_name)
            });
            if !used {
                tracing::warn!(
                    component = %component.name,
                    library = %link,
                    "Link dependency is not referenced by the artifact bytecode"
                );
            }
        }

        Ok(())
    }

    /// Check every argument against the constructor, or the initializer for proxied
    /// components: arity, literal coercion, and that references land on `address`
    /// parameters.
    fn validate_arguments(component: &Component, artifact: &Artifact) -> Result<(), DeployError> {
        let invalid = |reason: String| DeployError::InvalidArguments {
            component: component.name.clone(),
            reason,
        };
        let given = component.args.len();

        let params: Vec<Param> = match component.kind {
            DeploymentKind::Direct => {
                let params = artifact
                    .abi
                    .constructor
                    .as_ref()
                    .map(|c| c.inputs.clone())
                    .unwrap_or_default();
                if params.len() != given {
                    return Err(invalid(format!(
                        "constructor takes {} arguments, {given} given",
                        params.len()
                    )));
                }
                params
            }
            DeploymentKind::ProxiedUpgradeable => {
                let initializer = component.initializer_name();
                let function = resolve_initializer(&artifact.abi, initializer, given)
                    .map_err(|e| invalid(format!("{e:#} in {}", artifact.contract_name)))?;
                let params = function.map(|f| f.inputs).unwrap_or_default();
                if params.len() != given {
                    return Err(invalid(format!(
                        "`{initializer}` takes {} arguments, {given} given",
                        params.len()
                    )));
                }
                params
            }
        };

        for (position, (param, arg)) in params.iter().zip(&component.args).enumerate() {
            match arg {
                ArgSpec::Literal(value) => {
                    coerce_arg(param, value)
                        .map_err(|e| invalid(format!("argument {position}: {e:#}")))?;
                }
                ArgSpec::AddressOf { address_of } if param.ty != "address" => {
                    return Err(invalid(format!(
                        "argument {position}: address of `{address_of}` passed to a {} parameter",
                        param.ty
                    )));
                }
                ArgSpec::AddressOf { .. } => {}
            }
        }

        Ok(())
    }

    fn validate_setter(edge: &WiringEdge, target: &Artifact) -> Result<(), DeployError> {
        // Full signatures are encoded as written.
        if edge.setter.contains('(') {
            return Ok(());
        }

        let found = target
            .abi
            .function(&edge.setter)
            .is_some_and(|fs| fs.iter().any(|f| f.inputs.len() == 1));
        if !found {
            return Err(DeployError::InvalidArguments {
                component: edge.target.clone(),
                reason: format!(
                    "no single-argument `{}` in {} for wiring edge {edge}",
                    edge.setter, target.contract_name
                ),
            });
        }

        Ok(())
    }
}
