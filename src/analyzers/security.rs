//! Pattern-based security checks: leaked credentials, dynamic code
//! execution, shell injection and disabled TLS verification.

use super::rules::{scan_lines, PatternRule};
use crate::models::{Finding, Severity};
use once_cell::sync::Lazy;

pub const NAME: &str = "security";

static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    [
        PatternRule::new(
            "aws-access-key",
            r"\b(AKIA|ASIA)[0-9A-Z]{16}\b",
            Severity::Critical,
            "AWS access key in source",
            "A string shaped like an AWS access key id is committed to the repository.",
            "Revoke the key and load credentials from the environment or a secret store.",
        ),
        PatternRule::new(
            "private-key",
            r"-----BEGIN (RSA |EC |DSA |OPENSSH |PGP )?PRIVATE KEY( BLOCK)?-----",
            Severity::Critical,
            "Private key in source",
            "A PEM private key block is committed to the repository.",
            "Remove the key from history and rotate it.",
        ),
        PatternRule::new(
            "hardcoded-secret",
            r#"(?i)\b(password|passwd|secret|api[_-]?key|access[_-]?token|auth[_-]?token)\b\s*[:=]\s*["'][^"'\s]{4,}["']"#,
            Severity::High,
            "Hard-coded secret",
            "A credential-like value is assigned from a string literal.",
            "Read the value from configuration or the environment.",
        ),
        PatternRule::new(
            "dynamic-eval",
            r"(^|[^\w.])eval\s*\(",
            Severity::High,
            "Dynamic code evaluation",
            "eval() executes arbitrary code built at runtime.",
            "Parse the input explicitly instead of evaluating it.",
        )
        .map(|r| r.only(&["py", "js", "ts", "jsx", "tsx", "php", "rb"])),
        PatternRule::new(
            "shell-true",
            r"subprocess\.\w+\(.*shell\s*=\s*True",
            Severity::High,
            "Subprocess with shell=True",
            "Passing a command string through the shell allows injection.",
            "Pass an argument list and keep shell=False.",
        )
        .map(|r| r.only(&["py"])),
        PatternRule::new(
            "os-system",
            r"\bos\.system\s*\(",
            Severity::Medium,
            "os.system call",
            "os.system runs its argument through the shell.",
            "Use subprocess.run with an argument list.",
        )
        .map(|r| r.only(&["py"])),
        PatternRule::new(
            "tls-disabled",
            r"(verify\s*=\s*False|rejectUnauthorized\s*:\s*false|danger_accept_invalid_certs\s*\(\s*true\s*\)|InsecureSkipVerify\s*:\s*true)",
            Severity::Medium,
            "TLS verification disabled",
            "Certificate verification is turned off for an outbound connection.",
            "Keep verification on and trust the required CA explicitly.",
        ),
        PatternRule::new(
            "weak-hash",
            r"\b(hashlib\.(md5|sha1)|crypto\.createHash\(\s*['\x22](md5|sha1)['\x22])",
            Severity::Low,
            "Weak hash algorithm",
            "MD5 and SHA-1 are not collision resistant.",
            "Use SHA-256 or better for anything security relevant.",
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
});

/// Security analyzer.
#[derive(Debug, Clone, Default)]
pub struct SecurityAnalyzer {
    pub include_external: bool,
}

impl SecurityAnalyzer {
    pub fn new(include_external: bool) -> Self {
        Self { include_external }
    }

    pub fn analyze_file(&self, relative_path: &str, content: &str) -> Vec<Finding> {
        scan_lines(NAME, &RULES, relative_path, content)
    }
}
