//! Shell snippets run on provisioned hosts.
//!
//! Every snippet is idempotent on its own; remote markers are an
//! optimisation, not a correctness requirement.

use indexmap::IndexMap;

pub const NOTEBOOK_SERVICE: &str = "jupyter-notebook";
pub const MASTER_SERVICE: &str = "spark-master";
pub const WORKER_SERVICE: &str = "spark-worker";

const WORKER_ENV_FILE: &str = "/etc/default/spark-worker";

/// Quote `value` as a single POSIX shell word.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '='))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[must_use]
pub fn ensure_user(user: &str) -> String {
    let user = shell_quote(user);
    format!("id -u {user} >/dev/null 2>&1 || sudo useradd --create-home --shell /bin/bash {user}")
}

#[must_use]
pub fn remove_user(user: &str) -> String {
    let user = shell_quote(user);
    format!("! id -u {user} >/dev/null 2>&1 || sudo userdel --remove {user}")
}

#[must_use]
pub fn install_prerequisites() -> String {
    "sudo apt-get -y -q update && sudo apt-get -y -q install python3 python3-pip openjdk-17-jre-headless"
        .to_string()
}

#[must_use]
pub fn install_libraries(user: &str, libraries: &[String]) -> String {
    format!(
        "sudo -u {} python3 -m pip install --user {}",
        shell_quote(user),
        quote_all(libraries)
    )
}

#[must_use]
pub fn uninstall_libraries(user: &str, libraries: &[String]) -> String {
    format!(
        "sudo -u {} python3 -m pip uninstall -y {}",
        shell_quote(user),
        quote_all(libraries)
    )
}

#[must_use]
pub fn start_service(service: &str) -> String {
    format!("sudo systemctl enable --now {}", shell_quote(service))
}

#[must_use]
pub fn stop_service(service: &str) -> String {
    format!("sudo systemctl disable --now {} || true", shell_quote(service))
}

/// Point a worker at its master and restart the worker service.
#[must_use]
pub fn join_master(master_host: &str) -> String {
    format!(
        "echo {} | sudo tee {WORKER_ENV_FILE} >/dev/null && sudo systemctl restart {WORKER_SERVICE}",
        shell_quote(&format!("SPARK_MASTER_HOST={master_host}"))
    )
}

#[must_use]
pub fn leave_master() -> String {
    format!("sudo systemctl stop {WORKER_SERVICE} || true; sudo rm -f {WORKER_ENV_FILE}")
}

/// Exits 0 and prints the marker contents when present, exits 3 when absent.
#[must_use]
pub fn read_marker(path: &str) -> String {
    let path = shell_quote(path);
    format!("test -f {path} || exit 3; cat {path}")
}

#[must_use]
pub fn write_marker(dir: &str, path: &str, side_effects: &IndexMap<String, String>) -> String {
    let lines: Vec<String> = side_effects
        .iter()
        .map(|(key, value)| shell_quote(&format!("{key}={value}")))
        .collect();
    let staging = shell_quote(&format!("{path}.tmp"));
    format!(
        "mkdir -p {dir} && printf '%s\\n' {lines} > {staging} && mv {staging} {path}",
        dir = shell_quote(dir),
        lines = if lines.is_empty() {
            "''".to_string()
        } else {
            lines.join(" ")
        },
        path = shell_quote(path),
    )
}

#[must_use]
pub fn remove_marker(path: &str) -> String {
    format!("rm -f {}", shell_quote(path))
}

#[must_use]
pub fn remove_marker_dir(dir: &str) -> String {
    format!("rm -rf {}", shell_quote(dir))
}

fn quote_all(values: &[String]) -> String {
    values
        .iter()
        .map(|v| shell_quote(v))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_are_not_quoted() {
        assert_eq!(shell_quote("pandas==2.2"), "pandas==2.2");
        assert_eq!(shell_quote("/home/u/.ensure_dir"), "/home/u/.ensure_dir");
    }

    #[test]
    fn special_characters_are_single_quoted() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn marker_write_is_atomic_and_quoted() {
        let effects = IndexMap::from([("user".to_string(), "lab user".to_string())]);

        let cmd = write_marker("/m", "/m/ensure_user", &effects);

        assert_eq!(
            cmd,
            "mkdir -p /m && printf '%s\\n' 'user=lab user' > /m/ensure_user.tmp && mv /m/ensure_user.tmp /m/ensure_user"
        );
    }

    #[test]
    fn library_commands_quote_every_package() {
        let libs = vec!["numpy".to_string(), "scikit-learn>=1.4".to_string()];

        assert_eq!(
            install_libraries("lab", &libs),
            "sudo -u lab python3 -m pip install --user numpy 'scikit-learn>=1.4'"
        );
    }
}
