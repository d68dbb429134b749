// src/ipk/scripts.rs

//! Maintainer script assembly
//!
//! Opkg calls each maintainer script with the action as its first
//! argument, so recipe functions that map onto the same Debian script
//! (preupgrade/preremove onto `prerm`, postupgrade/postremove onto
//! `postrm`) are merged into one script with per-action guards.

use crate::recipe::Package;
use std::collections::BTreeMap;

/// Prelude shared by every generated maintainer script
const SCRIPT_HEADER: &str = "#!/usr/bin/env bash\nset -euo pipefail\n";

/// Wrap a recipe function body so it only runs for one opkg action.
fn guard(action: &str, body: &str) -> String {
    format!(
        "if [[ $1 = {action} ]]; then\n    script() {{\n{body}\n    }}\n    script\nfi\n",
        action = action,
        body = body
    )
}

/// Assemble the Debian-format maintainer scripts for a package.
///
/// Returns script contents keyed by member name (`preinst`,
/// `postinst`, `prerm`, `postrm`); packages without the corresponding
/// recipe functions get no entry.
pub fn maintainer_scripts(package: &Package) -> BTreeMap<String, String> {
    let mut scripts = BTreeMap::new();

    for (name, function, action) in [
        ("preinst", &package.preinstall, "install"),
        ("postinst", &package.configure, "configure"),
    ] {
        if let Some(body) = function {
            scripts.insert(
                name.to_string(),
                format!("{}\n{}", SCRIPT_HEADER, guard(action, body)),
            );
        }
    }

    for (name, upgrade, remove) in [
        ("prerm", &package.preupgrade, &package.preremove),
        ("postrm", &package.postupgrade, &package.postremove),
    ] {
        if upgrade.is_none() && remove.is_none() {
            continue;
        }

        let mut script = SCRIPT_HEADER.to_string();
        if let Some(body) = upgrade {
            script.push('\n');
            script.push_str(&guard("upgrade", body));
        }
        if let Some(body) = remove {
            script.push('\n');
            script.push_str(&guard("remove", body));
        }
        scripts.insert(name.to_string(), script);
    }

    scripts
}
