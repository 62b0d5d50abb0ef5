//! Embedded playbook script assets.
//!
//! Script bodies are compiled into the binary from `scripts/`. Shared helper
//! functions live in their own asset and are concatenated ahead of each body
//! at dispatch time rather than being pre-inlined, so helpers can change
//! independently of every script.

/// Shared helper functions prepended to every playbook body.
pub const HELPERS: &str = include_str!("../../scripts/helpers.sh");

/// One embedded playbook script plus its declared result contract.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScriptAsset {
    /// Identifier callers use to invoke the playbook.
    pub id: &'static str,
    /// One-line description shown in listings.
    pub summary: &'static str,
    /// Shell script body, executed after the shared helpers.
    pub body: &'static str,
    /// Result keys the script must report on success, beyond `status`.
    pub required_keys: &'static [&'static str],
}

/// Identifier of the fixed server introspection playbook.
pub const SERVER_INFO: &str = "server-info";

const ASSETS: &[ScriptAsset] = &[
    ScriptAsset {
        id: SERVER_INFO,
        summary: "probe distribution, privilege level, services, sites, and ports",
        body: include_str!("../../scripts/server_info.sh"),
        required_keys: &["distro", "permissions"],
    },
    ScriptAsset {
        id: "server-setup",
        summary: "install the base web stack and create the deployer account",
        body: include_str!("../../scripts/server_setup.sh"),
        required_keys: &["root_pass", "deployer_pass"],
    },
    ScriptAsset {
        id: "site-create",
        summary: "create a site root and nginx virtual host",
        body: include_str!("../../scripts/site_create.sh"),
        required_keys: &["domain", "created"],
    },
    ScriptAsset {
        id: "site-delete",
        summary: "remove a site root and its nginx virtual host",
        body: include_str!("../../scripts/site_delete.sh"),
        required_keys: &["domain", "removed"],
    },
    ScriptAsset {
        id: "cron-sync",
        summary: "replace the deployer crontab with the supplied job list",
        body: include_str!("../../scripts/cron_sync.sh"),
        required_keys: &["installed"],
    },
];

/// Looks up an asset by identifier.
#[must_use]
pub fn resolve(id: &str) -> Option<&'static ScriptAsset> {
    ASSETS.iter().find(|asset| asset.id == id)
}

/// Iterates all registered assets in declaration order.
pub fn all() -> impl Iterator<Item = &'static ScriptAsset> {
    ASSETS.iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_finds_every_registered_asset() {
        for asset in all() {
            let found = resolve(asset.id)
                .unwrap_or_else(|| panic!("asset {} should resolve", asset.id));
            assert_eq!(found.id, asset.id);
            assert!(!found.body.trim().is_empty(), "{} has an empty body", asset.id);
        }
    }

    #[test]
    fn resolve_rejects_unknown_identifiers() {
        assert!(resolve("no-such-playbook").is_none());
    }

    #[test]
    fn helpers_define_the_output_functions_scripts_rely_on() {
        for function in ["out()", "out_section()", "out_entry()", "fail()", "run_priv()"] {
            assert!(
                HELPERS.contains(function),
                "helpers.sh must define {function}"
            );
        }
    }
}
