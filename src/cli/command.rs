//! Built command lines: a program plus an ordered argument vector.
//!
//! Command builders only ever produce a [`CommandLine`]; nothing here runs a
//! process. Arguments are kept as discrete tokens and handed to the OS as an
//! argv, so no value is ever interpreted by a shell.

use std::fmt;

/// A program and its ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
    /// Indices into `args` rendered as `***` in the display form.
    redacted: Vec<usize>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            redacted: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `flag value`.
    pub fn opt(self, flag: &str, value: impl Into<String>) -> Self {
        self.arg(flag).arg(value)
    }

    /// Append `flag value` when `value` is present.
    pub fn opt_if<S: Into<String>>(self, flag: &str, value: Option<S>) -> Self {
        match value {
            Some(v) => self.opt(flag, v),
            None => self,
        }
    }

    /// Append `flag` when `cond` holds.
    pub fn flag_if(self, flag: &str, cond: bool) -> Self {
        if cond { self.arg(flag) } else { self }
    }

    /// Append `flag value`, hiding `value` from [`CommandLine::display`].
    pub fn secret_opt(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.args.push(flag.to_string());
        self.redacted.push(self.args.len());
        self.args.push(value.into());
        self
    }

    /// Replace the program (e.g. with a configured absolute path).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Display string for `raw_command`: tokens quoted where needed, secrets masked.
    pub fn display(&self) -> String {
        let mut out = quote(&self.program);
        for (i, arg) in self.args.iter().enumerate() {
            out.push(' ');
            if self.redacted.contains(&i) {
                out.push_str("***");
            } else {
                out.push_str(&quote(arg));
            }
        }
        out
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-_./:,=@%+*".contains(c)
}

/// POSIX single-quote a token unless it is made of plain characters only.
fn quote(token: &str) -> String {
    if !token.is_empty() && token.chars().all(is_plain) {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_preserves_order() {
        let cmd = CommandLine::new("ping")
            .opt("-c", "5")
            .opt("-i", "1")
            .flag_if("-q", false)
            .opt_if("-s", Some("56"))
            .opt_if::<String>("-W", None)
            .arg("example.com");
        assert_eq!(cmd.program(), "ping");
        assert_eq!(cmd.arguments(), ["-c", "5", "-i", "1", "-s", "56", "example.com"]);
        assert_eq!(cmd.display(), "ping -c 5 -i 1 -s 56 example.com");
    }

    #[test]
    fn test_metacharacters_stay_one_token() {
        let cmd = CommandLine::new("curl").opt("-H", "User-Agent: x; rm -rf /");
        assert_eq!(cmd.arguments().len(), 2);
        assert_eq!(cmd.arguments()[1], "User-Agent: x; rm -rf /");
        assert_eq!(cmd.display(), "curl -H 'User-Agent: x; rm -rf /'");
    }

    #[test]
    fn test_single_quotes_escaped() {
        let cmd = CommandLine::new("curl").opt("-d", "it's");
        assert_eq!(cmd.display(), r"curl -d 'it'\''s'");
        assert_eq!(CommandLine::new("x").arg("").display(), "x ''");
    }

    #[test]
    fn test_secret_redacted_in_display_only() {
        let cmd = CommandLine::new("wpscan")
            .opt("--url", "http://example.com")
            .secret_opt("--api-token", "s3cr3t");
        assert_eq!(cmd.arguments()[3], "s3cr3t");
        assert_eq!(cmd.display(), "wpscan --url http://example.com --api-token ***");
        assert!(!cmd.to_string().contains("s3cr3t"));
    }

    #[test]
    fn test_with_program() {
        let cmd = CommandLine::new("nmap").arg("-F").with_program("/opt/nmap/bin/nmap");
        assert_eq!(cmd.display(), "/opt/nmap/bin/nmap -F");
    }
}
