//! Batch validation of query definitions.
//!
//! Every problem is collected as a readable message so a broken mapping set can
//! be diagnosed in one pass before anything is served.

use std::collections::{HashMap, HashSet};

use super::definition::{QueryDefinition, ScriptDefinition};
use super::{versioned_name, ParameterSource, QueryType, ScriptKind};
use crate::convert::ParamType;

/// Script kinds usable for predicates, injections, hints and parameter values.
const EVALUATED: &[ScriptKind] = &[ScriptKind::Lua, ScriptKind::Native];

/// Validate a merged set of definitions, each tagged with the origin it was
/// loaded from.
pub(super) fn validate_definitions(definitions: &[(String, QueryDefinition)]) -> Vec<String> {
    let mut problems = Vec::new();
    let mut seen: HashMap<String, &str> = HashMap::new();
    let known: HashMap<String, QueryType> = definitions
        .iter()
        .map(|(_, def)| (versioned_name(&def.name, &def.version), def.query_type))
        .collect();

    for (origin, def) in definitions {
        let id = versioned_name(&def.name, &def.version);
        if def.name.trim().is_empty() {
            problems.push(format!("[{}] query without a name", origin));
            continue;
        }
        if let Some(first) = seen.insert(id.clone(), origin) {
            problems.push(format!(
                "[{}] duplicate query '{}' (first defined in {})",
                origin, id, first
            ));
        }

        check_script(&mut problems, origin, &id, "script", &def.script, None);

        for (name, ty) in &def.parameter_types {
            if ty.parse::<ParamType>().is_err() {
                problems.push(format!(
                    "[{}] query '{}' declares unknown type '{}' for parameter '{}'",
                    origin, id, ty, name
                ));
            }
        }

        for hint in &def.hints {
            if hint.key.trim().is_empty() {
                problems.push(format!("[{}] query '{}' has a hint without a key", origin, id));
            }
            if let Some(script) = &hint.script {
                let what = format!("hint '{}' script", hint.key);
                check_script(&mut problems, origin, &id, &what, script, Some(EVALUATED));
            }
        }

        let mut fetch_targets = HashSet::new();
        for fetch in &def.fetch_queries {
            let target = versioned_name(&fetch.reference_query, &fetch.reference_query_version);
            let label = format!("fetch query '{}'", target);

            if fetch.reference_query.trim().is_empty() {
                problems.push(format!(
                    "[{}] query '{}' has a fetch query without a reference query",
                    origin, id
                ));
                continue;
            }
            if target == id {
                problems.push(format!(
                    "[{}] query '{}' fetch query references itself",
                    origin, id
                ));
            }
            match known.get(&target) {
                None => problems.push(format!(
                    "[{}] query '{}' {} references an unknown query",
                    origin, id, label
                )),
                Some(kind) => {
                    if let Some(expected) = fetch.reference_query_type {
                        if expected != *kind {
                            problems.push(format!(
                                "[{}] query '{}' {} expects query type {:?} but found {:?}",
                                origin, id, label, expected, kind
                            ));
                        }
                    }
                }
            }
            let inject_target = fetch
                .inject_property_name
                .as_deref()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty());
            match (&inject_target, &fetch.injection_script) {
                (Some(_), Some(_)) | (None, None) => problems.push(format!(
                    "[{}] query '{}' {} must define exactly one of inject-property-name or injection-script",
                    origin, id, label
                )),
                (Some(path), None) => {
                    if !fetch_targets.insert(path.clone()) {
                        problems.push(format!(
                            "[{}] query '{}' has more than one fetch query injecting into '{}'",
                            origin, id, path
                        ));
                    }
                }
                (None, Some(script)) => check_script(
                    &mut problems,
                    origin,
                    &id,
                    &format!("{} injection script", label),
                    script,
                    Some(EVALUATED),
                ),
            }
            if let Some(predicate) = &fetch.predicate_script {
                check_script(
                    &mut problems,
                    origin,
                    &id,
                    &format!("{} predicate script", label),
                    predicate,
                    Some(EVALUATED),
                );
            }

            for param in &fetch.parameters {
                let what = format!("{} parameter '{}'", label, param.name);
                if param.name.trim().is_empty() {
                    problems.push(format!(
                        "[{}] query '{}' {} has a parameter without a name",
                        origin, id, label
                    ));
                }
                if param.source.requires_source_name()
                    && param.source_name.as_deref().map_or(true, |s| s.trim().is_empty())
                {
                    problems.push(format!(
                        "[{}] query '{}' {} requires a source-name",
                        origin, id, what
                    ));
                }
                match param.source {
                    ParameterSource::Constant if param.value.is_none() => problems.push(format!(
                        "[{}] query '{}' {} is constant but has no value",
                        origin, id, what
                    )),
                    ParameterSource::Script => match &param.script {
                        None => problems.push(format!(
                            "[{}] query '{}' {} is scripted but has no script",
                            origin, id, what
                        )),
                        Some(script) => check_script(
                            &mut problems,
                            origin,
                            &id,
                            &what,
                            script,
                            Some(EVALUATED),
                        ),
                    },
                    _ => {}
                }
                if let Some(ty) = &param.param_type {
                    if ty.parse::<ParamType>().is_err() {
                        problems.push(format!(
                            "[{}] query '{}' {} has unknown type '{}'",
                            origin, id, what, ty
                        ));
                    }
                }
            }
        }
    }

    problems
}

fn check_script(
    problems: &mut Vec<String>,
    origin: &str,
    id: &str,
    what: &str,
    script: &ScriptDefinition,
    allowed: Option<&[ScriptKind]>,
) {
    let Some(kind) = script.kind else {
        problems.push(format!("[{}] query '{}' {} has no type", origin, id, what));
        return;
    };
    if script.code_str().trim().is_empty() {
        problems.push(format!("[{}] query '{}' {} is empty", origin, id, what));
    }
    if let Some(allowed) = allowed {
        if !allowed.contains(&kind) {
            problems.push(format!(
                "[{}] query '{}' {} cannot be of type {}",
                origin, id, what, kind
            ));
        }
    }
}
