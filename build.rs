use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Every source rule is a regex that selects candidate lines plus a filter
// that decides whether a candidate is a real violation.
struct Rule {
    name: &'static str,
    pattern: &'static str,
    accept: fn(&str) -> bool,
    advice: &'static str,
    include_build_script: bool,
}

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED", "CORRECTED", "FIX", "FIXES", "NEW", "CHANGED", "CHANGES", "CHANGE", "MODIFIED",
    "MODIFIES", "MODIFY", "UPDATED", "UPDATES", "UPDATE",
];

const RULES: [Rule; 5] = [
    Rule {
        name: "underscore-prefixed variables",
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        accept: is_code_underscore,
        advice: "Underscore-prefixed variable names are not allowed in this project.\n   Either use the variable (removing the underscore) or remove it completely.",
        include_build_script: true,
    },
    Rule {
        name: "forbidden comment patterns",
        pattern: r"(//|/\*|///).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)",
        accept: |_| true,
        advice: "Comments narrating edits (FIXED, NEW, UPDATE and the like) are not allowed.\n   Remove them completely rather than commenting them out.",
        include_build_script: false,
    },
    Rule {
        name: "'**' in regular comments",
        pattern: r"(//|/\*).*\*\*",
        accept: is_starred_plain_comment,
        advice: "The '**' pattern is not allowed in regular comments (but is allowed in doc comments).",
        include_build_script: false,
    },
    Rule {
        name: "comments with all uppercase alphabetic characters",
        pattern: r"(//|/\*|///).*",
        accept: is_shouting_comment,
        advice: "Comments where all alphabetic characters are uppercase are not allowed.\n   Strongly consider deleting the comment completely.",
        include_build_script: false,
    },
    Rule {
        name: "#[allow(dead_code)] attributes",
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        accept: |_| true,
        advice: "#[allow(dead_code)] attributes are not allowed in this project.\n   Either use the code (removing the attribute) or remove it completely.",
        include_build_script: false,
    },
];

struct Violations<'r> {
    rule: &'r Rule,
    lines: Vec<String>,
}

impl Sink for Violations<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.rule.accept)(line_text) {
            self.lines.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

impl Violations<'_> {
    fn report(&self, path: &Path) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        let mut message = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.lines.len(),
            self.rule.name,
            path.display()
        );
        for line in &self.lines {
            message.push_str(&format!("   {line}\n"));
        }
        message.push_str(&format!("\n⚠️ {}\n", self.rule.advice));
        Some(message)
    }
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with("//") || line.contains("/*")
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///")
}

// Matches inside comments or string literals are not bindings.
fn is_code_underscore(line: &str) -> bool {
    let is_pure_comment = line.trim_start().starts_with("//")
        || (line.contains("/*") && !line.contains("*/match") && !line.contains("*/let"));
    let is_in_string = line
        .split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'));
    !is_pure_comment && !is_in_string
}

fn is_starred_plain_comment(line: &str) -> bool {
    !is_doc_comment(line) || FORBIDDEN_WORDS.iter().any(|word| line.contains(word))
}

fn is_shouting_comment(line: &str) -> bool {
    if !is_comment(line) {
        return false;
    }
    let trimmed = line.trim_start();
    let text = if let Some(rest) = trimmed.strip_prefix("///") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        rest
    } else if let Some(idx) = line.find("/*") {
        let rest = &line[idx + 2..];
        rest.find("*/").map_or(rest, |end| &rest[..end])
    } else {
        return false;
    };
    let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(char::is_uppercase)
}

// Rust sources of this package; the build output and the bundled reference
// material are not ours to police.
fn rust_sources(include_build_script: bool) -> Vec<PathBuf> {
    WalkDir::new(".")
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.path().starts_with("./target") && !e.path().starts_with("./examples"))
        .filter(|e| include_build_script || e.file_name() != "build.rs")
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn check(rule: &Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
    let mut searcher = Searcher::new();
    for path in rust_sources(rule.include_build_script) {
        if std::fs::read_to_string(&path).is_err() {
            continue;
        }
        let mut violations = Violations {
            rule,
            lines: Vec::new(),
        };
        searcher.search_path(&matcher, &path, &mut violations)?;
        if let Some(message) = violations.report(&path) {
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for rule in &RULES {
        if let Err(e) = check(rule) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
