// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! The audit trail attached to every artifact (spec.md §3): build host
//! metadata, Bob's own version, step kind, the recipe name and package
//! path, user-set `metaEnv.*` tags, and references to the audit trails of
//! every input artifact. An artifact without a complete audit trail must
//! never be uploaded or shared.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::retention::{FieldValue, Record};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildHost {
    pub os: String,
    pub kernel: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditTrail {
    pub build_id: String,
    pub build_host: BuildHost,
    pub bob_version: String,
    pub step_kind: String,
    pub scripting_language: String,
    pub recipe_name: String,
    pub package_path: String,
    /// The package's release counters at build time, carried straight from
    /// its recipe (display/audit metadata only, never a hash input).
    pub source_release: u64,
    pub build_release: u64,
    /// User-set `metaEnv.*` tags, keyed without the `metaEnv.` prefix.
    pub meta_env: BTreeMap<String, String>,
    /// Unix timestamp (seconds) the build completed.
    pub build_date: i64,
    /// Build-Ids of every input artifact's audit trail, for the
    /// retention language's transitive-keep rule.
    pub input_refs: Vec<String>,
}

impl Record for AuditTrail {
    fn id(&self) -> &str {
        &self.build_id
    }

    fn references(&self) -> &[String] {
        &self.input_refs
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "build.id" => FieldValue::Str(self.build_id.clone()),
            "build.host.os" => FieldValue::Str(self.build_host.os.clone()),
            "build.host.kernel" => FieldValue::Str(self.build_host.kernel.clone()),
            "build.host.hostname" => FieldValue::Str(self.build_host.hostname.clone()),
            // Zero-padded so lexicographic and chronological order agree,
            // letting the retention language's LIMIT/ORDER BY stay a plain
            // string sort.
            "build.date" => FieldValue::Str(format!("{:020}", self.build_date)),
            "bob.version" => FieldValue::Str(self.bob_version.clone()),
            "step.kind" => FieldValue::Str(self.step_kind.clone()),
            "scripting.language" => FieldValue::Str(self.scripting_language.clone()),
            "recipe.name" | "meta.recipe" => FieldValue::Str(self.recipe_name.clone()),
            "package.path" => FieldValue::Str(self.package_path.clone()),
            "source.release" => FieldValue::Str(format!("{:020}", self.source_release)),
            "build.release" => FieldValue::Str(format!("{:020}", self.build_release)),
            _ => match name.strip_prefix("meta.").and_then(|key| self.meta_env.get(key)) {
                Some(value) => FieldValue::Str(value.clone()),
                None => FieldValue::Undefined,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> AuditTrail {
        AuditTrail {
            build_id: "abc".to_string(),
            build_host: BuildHost {
                os: "linux".to_string(),
                kernel: "6.1".to_string(),
                hostname: "builder1".to_string(),
            },
            bob_version: "0.1.0".to_string(),
            step_kind: "package".to_string(),
            scripting_language: "sh".to_string(),
            recipe_name: "many".to_string(),
            package_path: "many".to_string(),
            source_release: 1,
            build_release: 1,
            meta_env: BTreeMap::new(),
            build_date: 1_700_000_000,
            input_refs: vec![],
        }
    }

    #[test]
    fn recipe_name_readable_under_meta_alias() {
        let trail = sample();
        assert_eq!(trail.field("meta.recipe"), FieldValue::Str("many".to_string()));
        assert_eq!(trail.field("recipe.name"), FieldValue::Str("many".to_string()));
    }

    #[test]
    fn unknown_field_is_undefined() {
        assert_eq!(sample().field("meta.nonexistent"), FieldValue::Undefined);
        assert_eq!(sample().field("totally.unknown"), FieldValue::Undefined);
    }
}
