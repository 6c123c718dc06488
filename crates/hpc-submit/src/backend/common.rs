//! Building blocks shared by the backend templates.

use std::fmt::{Display, Formatter};

use crate::common::utils::str::{shell_double_quote, shell_quote};
use crate::config::BaseConfig;

/// Mount point of the project directory inside the container.
pub const MNT_PROJECT: &str = "/project";
/// Mount point of the data directory inside the container.
pub const MNT_DATA: &str = "/data";
/// Mount point of the output directory inside the container.
pub const MNT_OUTPUT: &str = "/output";

/// A host directory exposed inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: String,
    pub target: &'static str,
}

impl Display for BindMount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.target)
    }
}

/// Binds the project, data and output directories to their fixed container paths.
pub fn container_binds(
    project: impl Into<String>,
    data: impl Into<String>,
    output: impl Into<String>,
) -> [BindMount; 3] {
    [
        BindMount {
            source: project.into(),
            target: MNT_PROJECT,
        },
        BindMount {
            source: data.into(),
            target: MNT_DATA,
        },
        BindMount {
            source: output.into(),
            target: MNT_OUTPUT,
        },
    ]
}

/// Command that runs the job executable inside the container.
/// Python scripts are started through `python3`, anything else is executed directly.
pub fn entry_point(executable: &str) -> String {
    let path = format!("{MNT_PROJECT}/{}", executable.trim_start_matches("./"));
    if executable.ends_with(".py") {
        format!("python3 {}", shell_quote(&path))
    } else {
        shell_quote(&path).into_owned()
    }
}

/// Virtual environment used by the wrapper script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenvSetup {
    /// Location of the environment, may reference environment variables.
    pub directory: String,
    /// Requirements file (container path) installed into the environment.
    pub requirements: Option<String>,
}

/// Variables of the wrapper script executed inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperScript {
    pub venv: Option<VenvSetup>,
    pub entry_point: String,
}

impl WrapperScript {
    /// Wrapper for `config`. `default_venv` is used when requirements are declared
    /// without an explicit `venv` location.
    pub fn from_config(config: &BaseConfig, default_venv: &str) -> Self {
        let requirements = (!config.requirements().is_empty())
            .then(|| format!("{MNT_PROJECT}/{}", config.requirements()));
        let venv = match (config.venv(), requirements) {
            ("", None) => None,
            ("", requirements) => Some(VenvSetup {
                directory: default_venv.to_string(),
                requirements,
            }),
            (directory, requirements) => Some(VenvSetup {
                directory: directory.to_string(),
                requirements,
            }),
        };
        Self {
            venv,
            entry_point: entry_point(config.executable()),
        }
    }

    pub fn render(&self) -> String {
        let mut script = String::from("#!/bin/bash\nset -eo pipefail\n");
        if let Some(venv) = &self.venv {
            script.push('\n');
            script.push_str(&format!("VENV={}\n", shell_double_quote(&venv.directory)));
            if let Some(requirements) = &venv.requirements {
                script.push_str(&render_venv_provisioning(requirements));
            }
            script.push_str(
                r#"
if [ -f "$VENV/bin/activate" ]; then
    source "$VENV/bin/activate"
fi
"#,
            );
        }
        script.push_str(&format!("\nexec {} \"$@\"\n", self.entry_point));
        script
    }
}

/// Creates the environment and installs requirements while holding an exclusive lock, so that
/// job instances sharing the environment do not provision it concurrently.
fn render_venv_provisioning(requirements: &str) -> String {
    format!(
        r#"REQUIREMENTS={requirements}

mkdir -p "$VENV"
exec 9>"$VENV/.lock"
flock 9
if [ -f "$REQUIREMENTS" ]; then
    if [ ! -x "$VENV/bin/python" ]; then
        python3 -m venv "$VENV"
    fi
    if ! cmp -s "$REQUIREMENTS" "$VENV/.requirements"; then
        "$VENV/bin/python" -m pip install --upgrade pip
        "$VENV/bin/python" -m pip install --requirement "$REQUIREMENTS"
        cp "$REQUIREMENTS" "$VENV/.requirements"
    fi
fi
flock -u 9
exec 9>&-
"#,
        requirements = shell_double_quote(requirements)
    )
}

#[cfg(test)]
mod tests {
    use super::{WrapperScript, container_binds, entry_point};
    use crate::config::BaseConfig;
    use serde_yaml::Mapping;

    fn config(extra: &str) -> BaseConfig {
        let merged: Mapping = serde_yaml::from_str(&format!(
            "{{project_dir: /proj, data_dir: /data, output_dir: /out, image: /img.sif, executable: run.py{extra}}}"
        ))
        .unwrap();
        BaseConfig::parse(&merged).unwrap()
    }

    #[test]
    fn test_container_binds() {
        let binds = container_binds("/p", "/d", "/o");
        let rendered: Vec<String> = binds.iter().map(|b| b.to_string()).collect();
        assert_eq!(rendered, vec!["/p:/project", "/d:/data", "/o:/output"]);
    }

    #[test]
    fn test_entry_point() {
        assert_eq!(entry_point("run.py"), "python3 /project/run.py");
        assert_eq!(entry_point("./bin/run.sh"), "/project/bin/run.sh");
        assert_eq!(entry_point("my job.py"), "python3 '/project/my job.py'");
    }

    #[test]
    fn test_wrapper_without_venv() {
        let script = WrapperScript::from_config(&config(""), "/scratch/.venv").render();
        insta::assert_snapshot!(script, @r###"
        #!/bin/bash
        set -eo pipefail

        exec python3 /project/run.py "$@"
        "###);
    }

    #[test]
    fn test_wrapper_with_requirements_uses_default_venv() {
        let wrapper =
            WrapperScript::from_config(&config(", requirements: req.txt"), "/scratch/.venv");
        let venv = wrapper.venv.as_ref().unwrap();
        assert_eq!(venv.directory, "/scratch/.venv");
        assert_eq!(venv.requirements.as_deref(), Some("/project/req.txt"));

        let script = wrapper.render();
        assert!(script.contains("VENV=\"/scratch/.venv\"\n"));
        assert!(script.contains("REQUIREMENTS=\"/project/req.txt\"\n"));
        let lock = script.find("flock 9\n").unwrap();
        let install = script.find("pip install --requirement").unwrap();
        let unlock = script.find("flock -u 9").unwrap();
        assert!(lock < install && install < unlock);
        assert!(script.ends_with("exec python3 /project/run.py \"$@\"\n"));
    }

    #[test]
    fn test_wrapper_with_explicit_venv_only_activates() {
        let wrapper = WrapperScript::from_config(&config(", venv: /shared/env"), "/unused");
        let script = wrapper.render();
        assert!(script.contains("VENV=\"/shared/env\"\n"));
        assert!(script.contains("source \"$VENV/bin/activate\""));
        assert!(!script.contains("flock"));
    }
}
