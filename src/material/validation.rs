//! Checks over the material list of a pipeline and across pipelines.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path};

use super::MaterialConfig;

fn normalized(dest: &str) -> String {
    dest.trim()
        .trim_start_matches("./")
        .trim_end_matches('/')
        .to_string()
}

fn is_nested(outer: &str, inner: &str) -> bool {
    inner
        .strip_prefix(outer)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Every problem with one pipeline's materials, in declaration order.
pub fn validate_pipeline_materials(pipeline: &str, materials: &[MaterialConfig]) -> Vec<String> {
    let mut problems: Vec<String> = materials.iter().flat_map(MaterialConfig::validate).collect();

    for material in materials {
        let Some(dest) = material.destination() else {
            continue;
        };
        if !material.kind.is_scm() {
            problems.push(format!(
                "pipeline '{}': {} material '{}' does not support a destination folder",
                pipeline,
                material.kind.tag(),
                material.display_name()
            ));
            continue;
        }
        let path = Path::new(dest);
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes {
            problems.push(format!(
                "pipeline '{}': destination '{}' must be a relative path inside the working directory",
                pipeline, dest
            ));
        }
    }

    let scm: Vec<&MaterialConfig> = materials.iter().filter(|m| m.kind.is_scm()).collect();
    if scm.len() > 1 {
        let mut folders: Vec<(String, String)> = Vec::new();
        for material in &scm {
            match material.destination() {
                Some(dest) => folders.push((normalized(dest), material.display_name())),
                None => problems.push(format!(
                    "pipeline '{}': material '{}' needs a destination folder because the pipeline has several source materials",
                    pipeline,
                    material.display_name()
                )),
            }
        }
        for (i, (a, a_name)) in folders.iter().enumerate() {
            for (b, b_name) in folders.iter().skip(i + 1) {
                if a == b {
                    problems.push(format!(
                        "pipeline '{}': materials '{}' and '{}' share the destination folder '{}'",
                        pipeline, a_name, b_name, a
                    ));
                } else if is_nested(a, b) || is_nested(b, a) {
                    problems.push(format!(
                        "pipeline '{}': destination folders '{}' and '{}' are nested",
                        pipeline, a, b
                    ));
                }
            }
        }
    }

    let mut seen = HashSet::new();
    for material in materials {
        if !seen.insert(material.pipeline_unique_fingerprint()) {
            problems.push(format!(
                "pipeline '{}': material '{}' is declared more than once",
                pipeline,
                material.display_name()
            ));
        }
    }

    problems
}

/// Materials sharing a fingerprint must agree on whether they are polled.
pub fn validate_auto_update_consistency<'a, I>(materials: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a MaterialConfig>,
{
    let mut by_fingerprint: HashMap<String, bool> = HashMap::new();
    let mut reported = HashSet::new();
    let mut problems = Vec::new();
    for material in materials {
        let fingerprint = material.fingerprint();
        match by_fingerprint.get(&fingerprint) {
            Some(auto_update) if *auto_update != material.auto_update => {
                if reported.insert(fingerprint.clone()) {
                    problems.push(format!(
                        "material '{}' is declared with different auto_update values; it must be the same everywhere",
                        material.display_name()
                    ));
                }
            }
            Some(_) => {}
            None => {
                by_fingerprint.insert(fingerprint, material.auto_update);
            }
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git(url: &str) -> MaterialConfig {
        MaterialConfig::git(url, "main")
    }

    #[test]
    fn test_single_material_needs_no_destination() {
        assert!(validate_pipeline_materials("p", &[git("https://h/a.git")]).is_empty());
    }

    #[test]
    fn test_several_scm_materials_need_destinations() {
        let problems = validate_pipeline_materials(
            "p",
            &[git("https://h/a.git").with_destination("a"), git("https://h/b.git")],
        );
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("needs a destination folder"));
    }

    #[test]
    fn test_dependency_does_not_count_as_scm() {
        let problems = validate_pipeline_materials(
            "p",
            &[git("https://h/a.git"), MaterialConfig::dependency("up", "dist")],
        );
        assert!(problems.is_empty());
    }

    #[test]
    fn test_nested_and_equal_destinations() {
        let problems = validate_pipeline_materials(
            "p",
            &[
                git("https://h/a.git").with_destination("src"),
                git("https://h/b.git").with_destination("src/lib"),
                git("https://h/c.git").with_destination("./src/"),
            ],
        );
        assert!(problems.iter().any(|p| p.contains("are nested")));
        assert!(problems.iter().any(|p| p.contains("share the destination folder 'src'")));
    }

    #[test]
    fn test_sibling_prefix_is_not_nested() {
        let problems = validate_pipeline_materials(
            "p",
            &[
                git("https://h/a.git").with_destination("app"),
                git("https://h/b.git").with_destination("application"),
            ],
        );
        assert!(problems.is_empty());
    }

    #[test]
    fn test_destination_must_stay_inside() {
        let problems =
            validate_pipeline_materials("p", &[git("https://h/a.git").with_destination("../out")]);
        assert!(problems[0].contains("must be a relative path"));
        let problems =
            validate_pipeline_materials("p", &[git("https://h/a.git").with_destination("/abs")]);
        assert!(problems[0].contains("must be a relative path"));
    }

    #[test]
    fn test_dependency_destination_rejected() {
        let problems = validate_pipeline_materials(
            "p",
            &[MaterialConfig::dependency("up", "dist").with_destination("x")],
        );
        assert!(problems[0].contains("does not support a destination folder"));
    }

    #[test]
    fn test_duplicate_material_rejected() {
        let problems = validate_pipeline_materials(
            "p",
            &[
                MaterialConfig::dependency("up", "dist"),
                MaterialConfig::dependency("up", "dist").with_name("again"),
            ],
        );
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("declared more than once"));
    }

    #[test]
    fn test_auto_update_consistency() {
        let a = git("https://h/a.git");
        let b = git("https://h/a.git").with_auto_update(false).with_destination("x");
        let c = git("https://h/other.git").with_auto_update(false);
        let problems = validate_auto_update_consistency([&a, &b, &c]);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("different auto_update values"));
    }
}
