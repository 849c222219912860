// ABOUTME: File language classification and per-language run command templates

use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    JavaScript,
    TypeScript,
    Python,
    Java,
    Cpp,
    C,
    CSharp,
    Php,
    Ruby,
    Go,
    Rust,
    Swift,
    Kotlin,
    Html,
    Css,
    Scss,
    Json,
    Xml,
    Yaml,
    Markdown,
    Sql,
    Shell,
    PlainText,
}

impl Language {
    /// Classify by the text after the last `.` of the name, case-insensitively
    pub fn from_file_name(name: &str) -> Self {
        let ext = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
        match ext.as_str() {
            "js" | "jsx" => Self::JavaScript,
            "ts" | "tsx" => Self::TypeScript,
            "py" => Self::Python,
            "java" => Self::Java,
            "cpp" | "cc" | "cxx" => Self::Cpp,
            "c" => Self::C,
            "cs" => Self::CSharp,
            "php" => Self::Php,
            "rb" => Self::Ruby,
            "go" => Self::Go,
            "rs" => Self::Rust,
            "swift" => Self::Swift,
            "kt" => Self::Kotlin,
            "html" => Self::Html,
            "css" => Self::Css,
            "scss" => Self::Scss,
            "json" => Self::Json,
            "xml" => Self::Xml,
            "yaml" | "yml" => Self::Yaml,
            "md" => Self::Markdown,
            "sql" => Self::Sql,
            "sh" | "bash" => Self::Shell,
            _ => Self::PlainText,
        }
    }

    /// Identifier shared with the editor front end
    pub fn id(self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Python => "python",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::C => "c",
            Self::CSharp => "csharp",
            Self::Php => "php",
            Self::Ruby => "ruby",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Swift => "swift",
            Self::Kotlin => "kotlin",
            Self::Html => "html",
            Self::Css => "css",
            Self::Scss => "scss",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Yaml => "yaml",
            Self::Markdown => "markdown",
            Self::Sql => "sql",
            Self::Shell => "shell",
            Self::PlainText => "plaintext",
        }
    }

    /// Shell command that runs `file` (a path relative to the room root),
    /// or `None` when there is no template for this language
    pub fn run_command(self, file: &str) -> Option<String> {
        let quoted = quote(file);
        let command = match self {
            Self::Java => {
                let class = file.strip_suffix(".java").unwrap_or(file);
                format!(r#"javac $(find . -name "*.java") && java {}"#, quote(class))
            }
            Self::Python => format!("python3 {quoted}"),
            Self::Cpp => {
                let exe = strip_any_suffix(file, &[".cpp", ".cc", ".cxx"]);
                let exe = quote(exe);
                format!("g++ -std=c++17 -O2 {quoted} -o {exe} && ./{exe}")
            }
            Self::JavaScript => format!("node {quoted}"),
            Self::TypeScript => {
                let js = format!("{}.js", strip_any_suffix(file, &[".ts", ".tsx"]));
                format!("tsc {quoted} && node {}", quote(&js))
            }
            _ => return None,
        };
        Some(command)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

fn quote(path: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(path))
}

fn strip_any_suffix<'a>(file: &'a str, suffixes: &[&str]) -> &'a str {
    suffixes
        .iter()
        .find_map(|suffix| file.strip_suffix(suffix))
        .unwrap_or(file)
}
