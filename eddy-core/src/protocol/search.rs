//! Search requests and search results (`$Search` / `$SR`).

use std::fmt;

use serde::{Deserialize, Serialize};

use super::CodecError;

/// File category filter carried in the fourth search field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    Any = 1,
    Audio = 2,
    Compressed = 3,
    Document = 4,
    Executable = 5,
    Picture = 6,
    Video = 7,
    Folder = 8,
    Tth = 9,
}

impl TryFrom<u8> for FileType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => FileType::Any,
            2 => FileType::Audio,
            3 => FileType::Compressed,
            4 => FileType::Document,
            5 => FileType::Executable,
            6 => FileType::Picture,
            7 => FileType::Video,
            8 => FileType::Folder,
            9 => FileType::Tth,
            other => return Err(other),
        })
    }
}

/// Where search results should be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SearchOrigin {
    /// Results go by UDP to `address:port`
    Active { address: String, port: u16 },
    /// Results are relayed by the hub to `nick`
    Passive { nick: String },
}

impl fmt::Display for SearchOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchOrigin::Active { address, port } => write!(f, "{address}:{port}"),
            SearchOrigin::Passive { nick } => write!(f, "Hub:{nick}"),
        }
    }
}

/// A parsed or outgoing `$Search` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub origin: SearchOrigin,
    pub size_restricted: bool,
    /// When restricted, whether `size` is a maximum rather than a minimum
    pub is_max_size: bool,
    pub size: u64,
    pub file_type: FileType,
    /// Search pattern with `$` separating terms; `TTH:<hash>` for hash searches
    pub pattern: String,
}

impl SearchRequest {
    /// Builds an unrestricted search for a space separated query.
    pub fn for_query(origin: SearchOrigin, query: &str) -> Self {
        Self {
            origin,
            size_restricted: false,
            is_max_size: true,
            size: 0,
            file_type: FileType::Any,
            pattern: query.split_whitespace().collect::<Vec<_>>().join("$"),
        }
    }

    /// Builds a search for a file with the given tiger tree hash.
    pub fn for_tth(origin: SearchOrigin, tth: &str) -> Self {
        Self {
            origin,
            size_restricted: false,
            is_max_size: true,
            size: 0,
            file_type: FileType::Tth,
            pattern: format!("TTH:{tth}"),
        }
    }

    /// Hash being searched for, if this is a hash search.
    pub fn tth(&self) -> Option<&str> {
        match self.file_type {
            FileType::Tth => self.pattern.strip_prefix("TTH:"),
            _ => None,
        }
    }

    /// Lowercased search terms.
    pub fn terms(&self) -> Vec<String> {
        self.pattern
            .split('$')
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    /// Whether a file of `size` bytes passes the size restriction.
    pub fn accepts_size(&self, size: u64) -> bool {
        if !self.size_restricted {
            return true;
        }
        if self.is_max_size {
            size <= self.size
        } else {
            size >= self.size
        }
    }

    /// Arguments of the `$Search` command.
    pub fn to_args(&self) -> String {
        format!(
            "{} {}?{}?{}?{}?{}",
            self.origin,
            flag(self.size_restricted),
            flag(self.is_max_size),
            self.size,
            self.file_type as u8,
            self.pattern
        )
    }

    pub(crate) fn from_fields(
        origin: SearchOrigin,
        restricted: &str,
        is_max: &str,
        size: &str,
        file_type: &str,
        pattern: String,
    ) -> Result<Self, CodecError> {
        let size = if size.is_empty() {
            0
        } else {
            parse_number::<u64>("Search", "size", size)?
        };
        let code = parse_number::<u8>("Search", "type", file_type)?;
        let file_type = FileType::try_from(code).map_err(|_| CodecError::InvalidNumber {
            command: "Search",
            field: "type",
            value: file_type.to_string(),
        })?;

        Ok(Self {
            origin,
            size_restricted: restricted == "T",
            is_max_size: is_max == "T",
            size,
            file_type,
            pattern,
        })
    }
}

fn flag(value: bool) -> char {
    if value { 'T' } else { 'F' }
}

/// A `$SR` search result for either a file or a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub nick: String,
    /// Backslash separated path as it appears on the wire
    pub path: String,
    /// File size; `None` for directory results
    pub size: Option<u64>,
    pub open_slots: u32,
    pub total_slots: u32,
    /// Hub name, or `TTH:<hash>` when the sender hashes its share
    pub hub_name: String,
    /// `ip:port` of the hub
    pub hub_address: String,
    /// Nick the hub should relay a passive result to
    pub target: Option<String>,
}

impl SearchResult {
    pub fn is_directory(&self) -> bool {
        self.size.is_none()
    }

    /// Tiger tree hash of the result, when the sender supplied one.
    pub fn tth(&self) -> Option<&str> {
        self.hub_name.strip_prefix("TTH:")
    }

    /// Final path component.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('\\').next().unwrap_or(&self.path)
    }

    /// Arguments of the `$SR` command.
    pub fn to_args(&self) -> String {
        let mut args = match self.size {
            Some(size) => format!(
                "{} {}\x05{} {}/{}\x05{} ({})",
                self.nick,
                self.path,
                size,
                self.open_slots,
                self.total_slots,
                self.hub_name,
                self.hub_address
            ),
            None => format!(
                "{} {} {}/{}\x05{} ({})",
                self.nick,
                self.path,
                self.open_slots,
                self.total_slots,
                self.hub_name,
                self.hub_address
            ),
        };
        if let Some(target) = &self.target {
            args.push('\x05');
            args.push_str(target);
        }
        args
    }
}

pub(crate) fn parse_number<T: std::str::FromStr>(
    command: &'static str,
    field: &'static str,
    value: &str,
) -> Result<T, CodecError> {
    value.parse().map_err(|_| CodecError::InvalidNumber {
        command,
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passive() -> SearchOrigin {
        SearchOrigin::Passive {
            nick: "alice".to_string(),
        }
    }

    #[test]
    fn test_query_joins_terms_with_dollar() {
        let request = SearchRequest::for_query(passive(), "ubuntu  iso");
        assert_eq!(request.pattern, "ubuntu$iso");
        assert_eq!(request.to_args(), "Hub:alice F?T?0?1?ubuntu$iso");
        assert_eq!(request.terms(), vec!["ubuntu", "iso"]);
    }

    #[test]
    fn test_tth_search() {
        let request = SearchRequest::for_tth(
            SearchOrigin::Active {
                address: "10.0.0.1".to_string(),
                port: 412,
            },
            "ABCDEF",
        );
        assert_eq!(request.to_args(), "10.0.0.1:412 F?T?0?9?TTH:ABCDEF");
        assert_eq!(request.tth(), Some("ABCDEF"));
    }

    #[test]
    fn test_size_restriction() {
        let mut request = SearchRequest::for_query(passive(), "movie");
        assert!(request.accepts_size(u64::MAX));

        request.size_restricted = true;
        request.size = 1000;
        assert!(request.accepts_size(1000));
        assert!(!request.accepts_size(1001));

        request.is_max_size = false;
        assert!(request.accepts_size(1001));
        assert!(!request.accepts_size(999));
    }

    #[test]
    fn test_invalid_file_type_rejected() {
        let result = SearchRequest::from_fields(passive(), "F", "T", "0", "12", "x".to_string());
        assert!(matches!(
            result,
            Err(CodecError::InvalidNumber { field: "type", .. })
        ));
    }

    #[test]
    fn test_result_args_for_file_and_directory() {
        let mut result = SearchResult {
            nick: "bob".to_string(),
            path: "music\\song.mp3".to_string(),
            size: Some(4096),
            open_slots: 2,
            total_slots: 4,
            hub_name: "TTH:HASH".to_string(),
            hub_address: "1.2.3.4:411".to_string(),
            target: Some("alice".to_string()),
        };
        assert_eq!(
            result.to_args(),
            "bob music\\song.mp3\x054096 2/4\x05TTH:HASH (1.2.3.4:411)\x05alice"
        );
        assert_eq!(result.tth(), Some("HASH"));
        assert_eq!(result.file_name(), "song.mp3");

        result.size = None;
        result.path = "music".to_string();
        result.target = None;
        assert_eq!(
            result.to_args(),
            "bob music 2/4\x05TTH:HASH (1.2.3.4:411)"
        );
        assert!(result.is_directory());
    }
}
