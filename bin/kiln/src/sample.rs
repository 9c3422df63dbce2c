//! The sample system written by `kiln init`: a shared library, a token, an address
//! registry and two upgradeable marketplaces that need both.

use kiln_deploy::{Component, Deployer, WiringEdge};

const LIBRARY: &str = "ArrayLibrary";
const TOKEN: &str = "SparksToken";
const REGISTRY: &str = "Addresses";
const MARKETPLACES: [&str; 2] = ["ERC721Sale", "ERC721Auction"];

pub fn sample_deployer() -> Deployer {
    let mut deployer = Deployer::default();
    // The marketplaces are upgradeable and link ArrayLibrary.
    deployer.options.unsafe_allow_linking = true;

    deployer.components = vec![
        Component::new(LIBRARY),
        Component::new(TOKEN),
        Component::new(REGISTRY).link(LIBRARY),
    ];
    deployer.components.extend(
        MARKETPLACES
            .iter()
            .map(|name| Component::new(*name).proxied().link(LIBRARY)),
    );

    deployer.wiring = MARKETPLACES
        .iter()
        .flat_map(|market| {
            [
                WiringEdge::new(TOKEN, *market, "setSparkTokenContractAddr"),
                WiringEdge::new(REGISTRY, *market, "setAddressesContractAddr"),
            ]
        })
        .collect();

    deployer
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_deploy::DependencyGraph;

    #[test]
    fn test_sample_order() {
        let deployer = sample_deployer();
        let order: Vec<&str> = DependencyGraph::order(&deployer.components)
            .unwrap()
            .into_iter()
            .map(|idx| deployer.components[idx].name.as_str())
            .collect();

        assert_eq!(
            order,
            vec!["ArrayLibrary", "SparksToken", "Addresses", "ERC721Sale", "ERC721Auction"]
        );
        assert_eq!(deployer.wiring.len(), 4);
    }

    #[test]
    fn test_sample_roundtrip() {
        let temp_dir = tempdir::TempDir::new("kiln-init").expect("Failed to create temp dir");
        let path = temp_dir.path().join("Kiln.toml");

        sample_deployer().save_to_file(&path).unwrap();
        let loaded = Deployer::load_from_file(&path).unwrap();

        assert_eq!(loaded.components, sample_deployer().components);
        assert_eq!(loaded.wiring, sample_deployer().wiring);
        assert!(loaded.options.unsafe_allow_linking);
    }
}
