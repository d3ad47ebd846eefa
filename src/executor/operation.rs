// Command classification
//
// A compiled command is parsed exactly once into an Operation; the engine
// dispatches on the variant.

/// One step of a server's run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Shell command executed verbatim
    Raw(String),

    /// `upload <local> <remote>`
    Upload { source: String, destination: String },

    /// `uploaddir[N] <local-dir> <remote-dir>`; `limit` 0 means all files
    UploadDir {
        source: String,
        destination: String,
        limit: usize,
    },

    /// `bak <path>`: rename aside to `<path>-YYYYMMDD`
    Backup { path: String },

    /// `zipbak <archive> <path>...`: zip into `<archive>.YYYYMMDD.bak.zip`
    ZipBackup { archive: String, paths: Vec<String> },
}

const UPLOAD_DIR: &str = "uploaddir";

impl Operation {
    /// Classify a command by its leading token
    ///
    /// Keywords are matched case-insensitively. A keyword with the wrong
    /// number of arguments falls through to `Raw`.
    pub fn parse(command: &str) -> Operation {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            return Operation::Raw(command.to_string());
        };
        let keyword = first.to_ascii_lowercase();

        match (keyword.as_str(), tokens.len()) {
            ("upload", 3) => Operation::Upload {
                source: tokens[1].to_string(),
                destination: tokens[2].to_string(),
            },
            ("bak", 2) => Operation::Backup {
                path: tokens[1].to_string(),
            },
            ("zipbak", n) if n >= 3 => Operation::ZipBackup {
                archive: tokens[1].to_string(),
                paths: tokens[2..].iter().map(|s| s.to_string()).collect(),
            },
            (kw, 3) if kw.starts_with(UPLOAD_DIR) => match parse_limit(&kw[UPLOAD_DIR.len()..]) {
                Some(limit) => Operation::UploadDir {
                    source: tokens[1].to_string(),
                    destination: tokens[2].to_string(),
                    limit,
                },
                None => Operation::Raw(command.to_string()),
            },
            _ => Operation::Raw(command.to_string()),
        }
    }

    /// Short name for logs and the run summary
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Raw(_) => "command",
            Operation::Upload { .. } => "upload",
            Operation::UploadDir { .. } => "uploaddir",
            Operation::Backup { .. } => "bak",
            Operation::ZipBackup { .. } => "zipbak",
        }
    }
}

fn parse_limit(suffix: &str) -> Option<usize> {
    if suffix.is_empty() {
        return Some(0);
    }
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}
