//! Frame parsing and serialization.
//!
//! Incoming frames are matched against an ordered table of byte patterns;
//! the first pattern that matches decides the message type. A few commands
//! have overlapping shapes and rely on that order:
//!
//! - the long `$MyINFO` form is tried before the short form
//! - file `$SR` results are tried before directory results
//! - passive `$Search Hub:<nick>` is tried before the active `<ip>:<port>` form

use std::sync::LazyLock;

use regex::bytes::{Captures, Regex};

use super::CodecError;
use super::search::{SearchOrigin, SearchRequest, SearchResult, parse_number};
use super::types::{AdcTransfer, Direction, Extensions, Message, MyInfo};

type Builder = fn(&Captures<'_>) -> Result<Message, CodecError>;

struct CommandPattern {
    command: &'static str,
    regex: Regex,
    build: Builder,
}

const COMMAND_PATTERNS: &[(&str, &str, Builder)] = &[
    ("ValidateDenide", r"^ValidateDenide(?: (.*))?$", build_validate_denied),
    ("GetPass", r"^GetPass$", |_| Ok(Message::GetPass)),
    ("BadPass", r"^BadPass$", |_| Ok(Message::BadPass)),
    ("Lock", r"^Lock (\S+)(?: Pk=(.*))?$", build_lock),
    ("UserIP", r"^UserIP (.*)$", build_user_ip),
    ("HubName", r"^HubName (.*)$", |c| {
        Ok(Message::HubName {
            name: text(c, 1, "HubName", "name")?,
        })
    }),
    ("HubIsFull", r"^HubIsFull$", |_| Ok(Message::HubIsFull)),
    ("HubTopic", r"^HubTopic (.*)$", |c| {
        Ok(Message::HubTopic {
            topic: text(c, 1, "HubTopic", "topic")?,
        })
    }),
    ("Hello", r"^Hello (.*)$", |c| {
        Ok(Message::Hello {
            nick: text(c, 1, "Hello", "nick")?,
        })
    }),
    (
        "MyINFO",
        r"^MyINFO \$ALL (\S+) ([^$]*)\$ \$([^$]*)\$([^$]*)\$([^$]*)\$$",
        build_my_info,
    ),
    ("MyINFO", r"^MyINFO \$ALL (\S+) ?([^$]*)\$?$", build_my_info_short),
    ("To", r"^To: (\S+) From: (\S+) \$(?:<[^>]*> )?(.*)$", build_private_message),
    ("ConnectToMe", r"^ConnectToMe (\S+) ([^:\s]+):(\S+)$", build_connect_to_me),
    ("NickList", r"^NickList (.*)$", |c| {
        Ok(Message::NickList {
            nicks: nick_list(c, "NickList")?,
        })
    }),
    ("OpList", r"^OpList (.*)$", |c| {
        Ok(Message::OpList {
            nicks: nick_list(c, "OpList")?,
        })
    }),
    ("BotList", r"^BotList (.*)$", |c| {
        Ok(Message::BotList {
            nicks: nick_list(c, "BotList")?,
        })
    }),
    (
        "SR",
        r"^SR (\S+) ([^\x05]*)\x05(\S+) (\S+)/(\S+)\x05([^\x05]*) \(([^)]*)\)(?:\x05(.*))?$",
        build_file_result,
    ),
    (
        "SR",
        r"^SR (\S+) ([^\x05]*) (\S+)/(\S+)\x05([^\x05]*) \(([^)]*)\)(?:\x05(.*))?$",
        build_directory_result,
    ),
    (
        "Search",
        r"^Search Hub:(\S+) ([TF])\?([TF])\?([^?]*)\?([^?]*)\?(.*)$",
        build_passive_search,
    ),
    (
        "Search",
        r"^Search ([^\s:]+):(\S+) ([TF])\?([TF])\?([^?]*)\?([^?]*)\?(.*)$",
        build_active_search,
    ),
    ("Quit", r"^Quit (.*)$", |c| {
        Ok(Message::Quit {
            nick: text(c, 1, "Quit", "nick")?,
        })
    }),
    ("RevConnectToMe", r"^RevConnectToMe (\S+) (\S+)$", |c| {
        Ok(Message::RevConnectToMe {
            from: text(c, 1, "RevConnectToMe", "from")?,
            to: text(c, 2, "RevConnectToMe", "to")?,
        })
    }),
    ("Version", r"^Version (.*)$", |c| {
        Ok(Message::Version {
            version: text(c, 1, "Version", "version")?,
        })
    }),
    ("GetNickList", r"^GetNickList$", |_| Ok(Message::GetNickList)),
    ("ValidateNick", r"^ValidateNick (.*)$", |c| {
        Ok(Message::ValidateNick {
            nick: text(c, 1, "ValidateNick", "nick")?,
        })
    }),
    ("MyPass", r"^MyPass (.*)$", |c| {
        Ok(Message::MyPass {
            password: text(c, 1, "MyPass", "password")?,
        })
    }),
    ("GetINFO", r"^GetINFO (\S+) (\S+)$", |c| {
        Ok(Message::GetInfo {
            nick: text(c, 1, "GetINFO", "nick")?,
            from: text(c, 2, "GetINFO", "from")?,
        })
    }),
    ("MyNick", r"^MyNick (.*)$", |c| {
        Ok(Message::MyNick {
            nick: text(c, 1, "MyNick", "nick")?,
        })
    }),
    ("Key", r"^Key (.*)$", |c| {
        Ok(Message::Key {
            key: bytes(c, 1),
        })
    }),
    ("Direction", r"^Direction (Download|Upload) (\S+)$", build_direction),
    ("Get", r"^Get (.*)\$(\S+)$", build_get),
    ("Send", r"^Send$", |_| Ok(Message::Send)),
    ("FileLength", r"^FileLength (\S+)$", |c| {
        Ok(Message::FileLength {
            size: number(c, 1, "FileLength", "size")?,
        })
    }),
    ("GetListLen", r"^GetListLen$", |_| Ok(Message::GetListLen)),
    ("MaxedOut", r"^MaxedOut$", |_| Ok(Message::MaxedOut)),
    ("Supports", r"^Supports(?: (.*))?$", |c| {
        let tokens = text(c, 1, "Supports", "extensions")?;
        Ok(Message::Supports {
            extensions: Extensions::new(tokens.split(' ')),
        })
    }),
    ("Error", r"^Error(?: (.*))?$", |c| {
        Ok(Message::Error {
            message: text(c, 1, "Error", "message")?,
        })
    }),
    ("Failed", r"^Failed(?: (.*))?$", |c| {
        Ok(Message::Failed {
            message: text(c, 1, "Failed", "message")?,
        })
    }),
    ("UGetBlock", r"^UGetBlock (\S+) (\S+) (.*)$", |c| {
        Ok(Message::UGetBlock {
            offset: number(c, 1, "UGetBlock", "offset")?,
            size: number(c, 2, "UGetBlock", "size")?,
            file: text(c, 3, "UGetBlock", "file")?,
        })
    }),
    ("UGetZBlock", r"^UGetZBlock (\S+) (\S+) (.*)$", |c| {
        Ok(Message::UGetZBlock {
            offset: number(c, 1, "UGetZBlock", "offset")?,
            size: number(c, 2, "UGetZBlock", "size")?,
            file: text(c, 3, "UGetZBlock", "file")?,
        })
    }),
    ("ADCGET", r"^ADCGET (\S+) (.+?) (\S+) (\S+?)( ZL1)?$", |c| {
        Ok(Message::AdcGet(adc_transfer(c, "ADCGET")?))
    }),
    ("ADCSND", r"^ADCSND (\S+) (.+?) (\S+) (\S+?)( ZL1)?$", |c| {
        Ok(Message::AdcSnd(adc_transfer(c, "ADCSND")?))
    }),
    ("Sending", r"^Sending(?: (\S+))?$", |c| {
        let size = match c.get(1) {
            Some(_) => Some(number(c, 1, "Sending", "size")?),
            None => None,
        };
        Ok(Message::Sending { size })
    }),
    ("Cancel", r"^Cancel$", |_| Ok(Message::Cancel)),
    ("Canceled", r"^Canceled$", |_| Ok(Message::Canceled)),
];

static COMMANDS: LazyLock<Vec<CommandPattern>> = LazyLock::new(|| {
    COMMAND_PATTERNS
        .iter()
        .filter_map(|(command, pattern, build)| {
            let regex = Regex::new(&format!("(?s-u){pattern}")).ok()?;
            Some(CommandPattern {
                command: *command,
                regex,
                build: *build,
            })
        })
        .collect()
});

static CHAT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s-u)^<([^>\s]+)> (.*)$").ok());

/// Stateless parser and serializer for Direct Connect frames.
pub struct MessageCodec;

impl MessageCodec {
    /// Parses one frame (without its trailing `|`) into a [`Message`].
    ///
    /// Never fails: unrecognised input becomes [`Message::Unknown`], known
    /// commands with non-UTF-8 text become [`Message::BadEncoding`] and bad
    /// numeric fields become [`Message::Malformed`].
    pub fn parse(frame: &[u8]) -> Message {
        if frame.is_empty() {
            return Message::KeepAlive;
        }

        if let Some(body) = frame.strip_prefix(b"$") {
            for pattern in COMMANDS.iter() {
                if let Some(captures) = pattern.regex.captures(body) {
                    return match (pattern.build)(&captures) {
                        Ok(message) => message,
                        Err(CodecError::BadEncoding { .. }) => Message::BadEncoding {
                            command: pattern.command,
                            raw: frame.to_vec(),
                        },
                        Err(error) => Message::Malformed {
                            raw: frame.to_vec(),
                            error,
                        },
                    };
                }
            }
            return Message::Unknown {
                raw: frame.to_vec(),
            };
        }

        if let Some(captures) = CHAT.as_ref().and_then(|chat| chat.captures(frame)) {
            let from = text(&captures, 1, "Chat", "from");
            let body = text(&captures, 2, "Chat", "text");
            return match (from, body) {
                (Ok(from), Ok(body)) => Message::Chat {
                    from,
                    text: unescape(&body),
                },
                _ => Message::BadEncoding {
                    command: "Chat",
                    raw: frame.to_vec(),
                },
            };
        }

        Message::Unknown {
            raw: frame.to_vec(),
        }
    }

    /// Formats a command frame: `$command args|` or `$command|`.
    pub fn format_command(command: &str, args: Option<&[u8]>) -> Vec<u8> {
        let mut out = Vec::with_capacity(command.len() + args.map_or(0, <[u8]>::len) + 3);
        out.push(b'$');
        out.extend_from_slice(command.as_bytes());
        if let Some(args) = args {
            out.push(b' ');
            out.extend_from_slice(args);
        }
        out.push(b'|');
        out
    }

    /// Serializes a message into its wire frame, including the trailing `|`.
    pub fn serialize(message: &Message) -> Vec<u8> {
        let cmd = |command: &str, args: String| Self::format_command(command, Some(args.as_bytes()));
        let bare = |command: &str| Self::format_command(command, None);

        match message {
            Message::KeepAlive => b"|".to_vec(),
            Message::Lock { lock, pk } => {
                let mut args = lock.clone();
                args.extend_from_slice(b" Pk=");
                args.extend_from_slice(pk);
                Self::format_command("Lock", Some(&args))
            }
            Message::Key { key } => Self::format_command("Key", Some(key)),
            Message::ValidateNick { nick } => cmd("ValidateNick", nick.clone()),
            Message::ValidateDenied { nick } => cmd("ValidateDenide", nick.clone()),
            Message::GetPass => bare("GetPass"),
            Message::MyPass { password } => cmd("MyPass", password.clone()),
            Message::BadPass => bare("BadPass"),
            Message::HubName { name } => cmd("HubName", name.clone()),
            Message::HubIsFull => bare("HubIsFull"),
            Message::HubTopic { topic } => cmd("HubTopic", topic.clone()),
            Message::Hello { nick } => cmd("Hello", nick.clone()),
            Message::Version { version } => cmd("Version", version.clone()),
            Message::GetNickList => bare("GetNickList"),
            Message::NickList { nicks } => cmd("NickList", join_nicks(nicks)),
            Message::OpList { nicks } => cmd("OpList", join_nicks(nicks)),
            Message::BotList { nicks } => cmd("BotList", join_nicks(nicks)),
            Message::MyInfo(info) => {
                let status = info.status.map(char::from).map(String::from).unwrap_or_default();
                cmd(
                    "MyINFO",
                    format!(
                        "$ALL {} {}$ ${}{}${}${}$",
                        info.nick, info.description, info.speed, status, info.email, info.share_size
                    ),
                )
            }
            Message::GetInfo { nick, from } => cmd("GetINFO", format!("{nick} {from}")),
            Message::UserIp { users } => {
                let entries: Vec<String> = users
                    .iter()
                    .map(|(nick, address)| format!("{nick} {address}"))
                    .collect();
                cmd("UserIP", entries.join("$$"))
            }
            Message::Quit { nick } => cmd("Quit", nick.clone()),
            Message::ConnectToMe {
                nick,
                address,
                port,
            } => cmd("ConnectToMe", format!("{nick} {address}:{port}")),
            Message::RevConnectToMe { from, to } => cmd("RevConnectToMe", format!("{from} {to}")),
            Message::Search(request) => cmd("Search", request.to_args()),
            Message::SearchResult(result) => cmd("SR", result.to_args()),
            Message::PrivateMessage { to, from, text } => cmd(
                "To:",
                format!("{to} From: {from} $<{from}> {}", escape(text)),
            ),
            Message::Chat { from, text } => format!("<{from}> {}|", escape(text)).into_bytes(),
            Message::MyNick { nick } => cmd("MyNick", nick.clone()),
            Message::Supports { extensions } => cmd("Supports", extensions.to_string()),
            Message::Direction { direction, number } => {
                cmd("Direction", format!("{direction} {number}"))
            }
            Message::Get { file, offset } => cmd("Get", format!("{file}${}", offset + 1)),
            Message::Send => bare("Send"),
            Message::FileLength { size } => cmd("FileLength", size.to_string()),
            Message::GetListLen => bare("GetListLen"),
            Message::MaxedOut => bare("MaxedOut"),
            Message::Error { message } => cmd("Error", message.clone()),
            Message::Failed { message } => cmd("Failed", message.clone()),
            Message::AdcGet(transfer) => cmd("ADCGET", adc_args(transfer)),
            Message::AdcSnd(transfer) => cmd("ADCSND", adc_args(transfer)),
            Message::UGetBlock { offset, size, file } => {
                cmd("UGetBlock", format!("{offset} {size} {file}"))
            }
            Message::UGetZBlock { offset, size, file } => {
                cmd("UGetZBlock", format!("{offset} {size} {file}"))
            }
            Message::Sending { size: Some(size) } => cmd("Sending", size.to_string()),
            Message::Sending { size: None } => bare("Sending"),
            Message::Cancel => bare("Cancel"),
            Message::Canceled => bare("Canceled"),
            Message::Unknown { raw }
            | Message::BadEncoding { raw, .. }
            | Message::Malformed { raw, .. } => {
                let mut out = raw.clone();
                out.push(b'|');
                out
            }
        }
    }
}

impl Message {
    /// Serializes this message into its wire frame.
    pub fn to_wire(&self) -> Vec<u8> {
        MessageCodec::serialize(self)
    }
}

fn bytes(captures: &Captures<'_>, index: usize) -> Vec<u8> {
    captures
        .get(index)
        .map(|m| m.as_bytes().to_vec())
        .unwrap_or_default()
}

fn text(
    captures: &Captures<'_>,
    index: usize,
    command: &'static str,
    field: &'static str,
) -> Result<String, CodecError> {
    let Some(found) = captures.get(index) else {
        return Ok(String::new());
    };
    std::str::from_utf8(found.as_bytes())
        .map(str::to_string)
        .map_err(|_| CodecError::BadEncoding { command, field })
}

fn number<T: std::str::FromStr>(
    captures: &Captures<'_>,
    index: usize,
    command: &'static str,
    field: &'static str,
) -> Result<T, CodecError> {
    let value = text(captures, index, command, field)?;
    parse_number(command, field, &value)
}

fn nick_list(captures: &Captures<'_>, command: &'static str) -> Result<Vec<String>, CodecError> {
    let list = text(captures, 1, command, "nicks")?;
    Ok(list
        .split("$$")
        .filter(|nick| !nick.is_empty())
        .map(str::to_string)
        .collect())
}

fn join_nicks(nicks: &[String]) -> String {
    let mut out = nicks.join("$$");
    out.push_str("$$");
    out
}

fn escape(text: &str) -> String {
    text.replace('$', "&#36;").replace('|', "&#124;")
}

fn unescape(text: &str) -> String {
    text.replace("&#36;", "$").replace("&#124;", "|")
}

fn adc_args(transfer: &AdcTransfer) -> String {
    let mut args = format!(
        "{} {} {} {}",
        transfer.kind, transfer.identifier, transfer.offset, transfer.size
    );
    if transfer.zlib {
        args.push_str(" ZL1");
    }
    args
}

fn adc_transfer(captures: &Captures<'_>, command: &'static str) -> Result<AdcTransfer, CodecError> {
    Ok(AdcTransfer {
        kind: text(captures, 1, command, "kind")?,
        identifier: text(captures, 2, command, "identifier")?,
        offset: number(captures, 3, command, "offset")?,
        size: number(captures, 4, command, "size")?,
        zlib: captures.get(5).is_some(),
    })
}

fn build_validate_denied(c: &Captures<'_>) -> Result<Message, CodecError> {
    Ok(Message::ValidateDenied {
        nick: text(c, 1, "ValidateDenide", "nick")?,
    })
}

fn build_lock(c: &Captures<'_>) -> Result<Message, CodecError> {
    Ok(Message::Lock {
        lock: bytes(c, 1),
        pk: bytes(c, 2),
    })
}

fn build_user_ip(c: &Captures<'_>) -> Result<Message, CodecError> {
    let list = text(c, 1, "UserIP", "users")?;
    let users = list
        .split("$$")
        .filter_map(|entry| {
            let (nick, address) = entry.split_once(' ')?;
            Some((nick.to_string(), address.to_string()))
        })
        .collect();
    Ok(Message::UserIp { users })
}

fn build_my_info(c: &Captures<'_>) -> Result<Message, CodecError> {
    let mut speed = text(c, 3, "MyINFO", "speed")?;
    let status = speed.pop().and_then(|ch| u8::try_from(ch).ok());
    let share = text(c, 5, "MyINFO", "share")?;
    let share_size = if share.is_empty() {
        0
    } else {
        parse_number("MyINFO", "share", &share)?
    };

    Ok(Message::MyInfo(MyInfo {
        nick: text(c, 1, "MyINFO", "nick")?,
        description: text(c, 2, "MyINFO", "description")?,
        speed,
        status,
        email: text(c, 4, "MyINFO", "email")?,
        share_size,
    }))
}

fn build_my_info_short(c: &Captures<'_>) -> Result<Message, CodecError> {
    Ok(Message::MyInfo(MyInfo {
        nick: text(c, 1, "MyINFO", "nick")?,
        description: text(c, 2, "MyINFO", "description")?,
        ..MyInfo::default()
    }))
}

fn build_private_message(c: &Captures<'_>) -> Result<Message, CodecError> {
    Ok(Message::PrivateMessage {
        to: text(c, 1, "To", "to")?,
        from: text(c, 2, "To", "from")?,
        text: unescape(&text(c, 3, "To", "text")?),
    })
}

fn build_connect_to_me(c: &Captures<'_>) -> Result<Message, CodecError> {
    Ok(Message::ConnectToMe {
        nick: text(c, 1, "ConnectToMe", "nick")?,
        address: text(c, 2, "ConnectToMe", "address")?,
        port: number(c, 3, "ConnectToMe", "port")?,
    })
}

fn build_file_result(c: &Captures<'_>) -> Result<Message, CodecError> {
    Ok(Message::SearchResult(SearchResult {
        nick: text(c, 1, "SR", "nick")?,
        path: text(c, 2, "SR", "path")?,
        size: Some(number(c, 3, "SR", "size")?),
        open_slots: number(c, 4, "SR", "open_slots")?,
        total_slots: number(c, 5, "SR", "total_slots")?,
        hub_name: text(c, 6, "SR", "hub_name")?,
        hub_address: text(c, 7, "SR", "hub_address")?,
        target: c.get(8).map(|_| text(c, 8, "SR", "target")).transpose()?,
    }))
}

fn build_directory_result(c: &Captures<'_>) -> Result<Message, CodecError> {
    Ok(Message::SearchResult(SearchResult {
        nick: text(c, 1, "SR", "nick")?,
        path: text(c, 2, "SR", "path")?,
        size: None,
        open_slots: number(c, 3, "SR", "open_slots")?,
        total_slots: number(c, 4, "SR", "total_slots")?,
        hub_name: text(c, 5, "SR", "hub_name")?,
        hub_address: text(c, 6, "SR", "hub_address")?,
        target: c.get(7).map(|_| text(c, 7, "SR", "target")).transpose()?,
    }))
}

fn build_passive_search(c: &Captures<'_>) -> Result<Message, CodecError> {
    let origin = SearchOrigin::Passive {
        nick: text(c, 1, "Search", "nick")?,
    };
    search_request(c, origin, 2)
}

fn build_active_search(c: &Captures<'_>) -> Result<Message, CodecError> {
    let origin = SearchOrigin::Active {
        address: text(c, 1, "Search", "address")?,
        port: number(c, 2, "Search", "port")?,
    };
    search_request(c, origin, 3)
}

fn search_request(
    c: &Captures<'_>,
    origin: SearchOrigin,
    first: usize,
) -> Result<Message, CodecError> {
    let request = SearchRequest::from_fields(
        origin,
        &text(c, first, "Search", "size_restricted")?,
        &text(c, first + 1, "Search", "is_max_size")?,
        &text(c, first + 2, "Search", "size")?,
        &text(c, first + 3, "Search", "type")?,
        text(c, first + 4, "Search", "pattern")?,
    )?;
    Ok(Message::Search(request))
}

fn build_direction(c: &Captures<'_>) -> Result<Message, CodecError> {
    let direction = match c.get(1).map(|m| m.as_bytes()) {
        Some(b"Download") => Direction::Download,
        _ => Direction::Upload,
    };
    Ok(Message::Direction {
        direction,
        number: number(c, 2, "Direction", "number")?,
    })
}

fn build_get(c: &Captures<'_>) -> Result<Message, CodecError> {
    let raw_offset = text(c, 2, "Get", "offset")?;
    let one_based: u64 = parse_number("Get", "offset", &raw_offset)?;
    let offset = one_based
        .checked_sub(1)
        .ok_or_else(|| CodecError::InvalidNumber {
            command: "Get",
            field: "offset",
            value: raw_offset.clone(),
        })?;
    Ok(Message::Get {
        file: text(c, 1, "Get", "file")?,
        offset,
    })
}

#[cfg(test)]
pub(crate) fn pattern_count() -> (usize, usize) {
    (COMMANDS.len(), COMMAND_PATTERNS.len())
}
