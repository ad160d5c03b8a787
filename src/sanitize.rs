/// Kubernetes label values are capped at 63 characters.
pub const MAX_LABEL_LEN: usize = 63;

const EMPTY_LABEL: &str = "unknown";

/// Turn an arbitrary image name or job id into a valid label value that can
/// also be used as a component of a record name.
///
/// The result is lowercase, contains only `[a-z0-9.-]`, starts and ends with an
/// alphanumeric character and is at most [`MAX_LABEL_LEN`] characters long.
/// Every other character (`:` and `/` in image references, mostly) becomes `-`.
/// Applying it twice gives the same result as applying it once.
pub fn sanitize_label(value: &str) -> String {
    let mapped: String = value
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_LEN)
        .collect();

    let trimmed = mapped.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    if trimmed.is_empty() {
        EMPTY_LABEL.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_reference_separators() {
        assert_eq!(sanitize_label("nginx:latest"), "nginx-latest");
        assert_eq!(
            sanitize_label("docker.io/library/nginx:1.25"),
            "docker.io-library-nginx-1.25"
        );
    }

    #[test]
    fn lowercases_and_strips_edges() {
        assert_eq!(sanitize_label("Job_ID-42_"), "job-id-42");
        assert_eq!(sanitize_label("--x--"), "x");
        assert_eq!(sanitize_label("ghcr.io/Org/App@sha256:abc"), "ghcr.io-org-app-sha256-abc");
    }

    #[test]
    fn empty_input_gets_placeholder() {
        assert_eq!(sanitize_label(""), "unknown");
        assert_eq!(sanitize_label("::/"), "unknown");
    }

    #[test]
    fn truncates_to_label_limit() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_label(&long).len(), MAX_LABEL_LEN);

        // truncation landing on a separator must not leave a trailing '-'
        let edge = format!("{}:tail", "b".repeat(MAX_LABEL_LEN - 1));
        let out = sanitize_label(&edge);
        assert_eq!(out, "b".repeat(MAX_LABEL_LEN - 1));
    }

    #[test]
    fn idempotent() {
        let repeated = "x/".repeat(50);
        let inputs = [
            "nginx:latest",
            "Registry.Example.com:5000/team/app:v1.2.3",
            "___",
            "ÜberImage/ä",
            "job-2024-10-18T12:00:00Z",
            repeated.as_str(),
        ];
        for input in inputs {
            let once = sanitize_label(input);
            assert_eq!(sanitize_label(&once), once, "input: {input}");
        }
    }

    #[test]
    fn deterministic() {
        assert_eq!(sanitize_label("alpine:3.20"), sanitize_label("alpine:3.20"));
    }
}
