//! Core types and enumerations for the Direct Connect wire protocol

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::CodecError;
use super::search::{SearchRequest, SearchResult};

/// Remote name of the XML + bzip2 file catalog.
pub const XML_BZ_LIST: &str = "files.xml.bz2";
/// Remote name of the legacy bzip2 file catalog.
pub const BZ_LIST: &str = "MyList.bz2";
/// Remote name of the uncompressed legacy file catalog.
pub const DC_LIST: &str = "MyList.DcLst";

/// Extension tokens understood by this client.
pub mod ext {
    pub const MINI_SLOTS: &str = "MiniSlots";
    pub const XML_BZ_LIST: &str = "XmlBZList";
    pub const BZ_LIST: &str = "BZList";
    pub const ADC_GET: &str = "ADCGet";
    pub const TTHF: &str = "TTHF";
    pub const ZLIG: &str = "ZLIG";
    pub const GET_ZBLOCK: &str = "GetZBlock";
}

/// Transfer direction a peer declares during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    /// Wire spelling of the direction.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Download => "Download",
            Direction::Upload => "Upload",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of extension tokens advertised through `$Supports`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions(BTreeSet<String>);

impl Extensions {
    /// Builds a set from any iterator of tokens, skipping empty ones.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            tokens
                .into_iter()
                .map(Into::into)
                .filter(|token: &String| !token.is_empty())
                .collect(),
        )
    }

    /// Extensions this client advertises to peers.
    pub fn ours() -> Self {
        Self::new([
            ext::MINI_SLOTS,
            ext::XML_BZ_LIST,
            ext::ADC_GET,
            ext::TTHF,
            ext::ZLIG,
            ext::GET_ZBLOCK,
        ])
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<&str> = self.iter().collect();
        f.write_str(&tokens.join(" "))
    }
}

/// Self description broadcast through `$MyINFO`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MyInfo {
    pub nick: String,
    /// Free-form description, usually ending in a `<++ ...>` client tag
    pub description: String,
    /// Connection speed label without the trailing status byte
    pub speed: String,
    /// Status flag byte appended to the speed field
    pub status: Option<u8>,
    pub email: String,
    pub share_size: u64,
}

/// Arguments shared by `$ADCGET` requests and `$ADCSND` replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdcTransfer {
    /// Transfer kind, `file` for whole files and catalogs
    pub kind: String,
    /// Either a path or `TTH/<hash>`
    pub identifier: String,
    pub offset: u64,
    /// Number of bytes, `-1` for the remainder of the file
    pub size: i64,
    /// Whether the stream is zlib compressed (`ZL1`)
    pub zlib: bool,
}

/// Direct Connect protocol messages.
///
/// Produced by [`MessageCodec::parse`](super::MessageCodec::parse) from one
/// `|`-delimited frame and consumed by the hub and peer session state
/// machines. Lock and key payloads are kept as raw bytes since the key
/// derivation produces arbitrary byte values.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Empty frame, sent by hubs as a keep-alive
    KeepAlive,
    Lock {
        lock: Vec<u8>,
        pk: Vec<u8>,
    },
    Key {
        key: Vec<u8>,
    },
    ValidateNick {
        nick: String,
    },
    ValidateDenied {
        nick: String,
    },
    GetPass,
    MyPass {
        password: String,
    },
    BadPass,
    HubName {
        name: String,
    },
    HubIsFull,
    HubTopic {
        topic: String,
    },
    Hello {
        nick: String,
    },
    Version {
        version: String,
    },
    GetNickList,
    NickList {
        nicks: Vec<String>,
    },
    OpList {
        nicks: Vec<String>,
    },
    BotList {
        nicks: Vec<String>,
    },
    MyInfo(MyInfo),
    GetInfo {
        nick: String,
        from: String,
    },
    UserIp {
        users: Vec<(String, String)>,
    },
    Quit {
        nick: String,
    },
    ConnectToMe {
        nick: String,
        address: String,
        port: u16,
    },
    RevConnectToMe {
        from: String,
        to: String,
    },
    Search(SearchRequest),
    SearchResult(SearchResult),
    PrivateMessage {
        to: String,
        from: String,
        text: String,
    },
    Chat {
        from: String,
        text: String,
    },
    MyNick {
        nick: String,
    },
    Supports {
        extensions: Extensions,
    },
    Direction {
        direction: Direction,
        number: u32,
    },
    /// Legacy fetch; `offset` is zero based, the wire form is one based
    Get {
        file: String,
        offset: u64,
    },
    Send,
    FileLength {
        size: u64,
    },
    GetListLen,
    MaxedOut,
    Error {
        message: String,
    },
    Failed {
        message: String,
    },
    AdcGet(AdcTransfer),
    AdcSnd(AdcTransfer),
    UGetBlock {
        offset: u64,
        size: i64,
        file: String,
    },
    UGetZBlock {
        offset: u64,
        size: i64,
        file: String,
    },
    Sending {
        size: Option<u64>,
    },
    Cancel,
    Canceled,
    /// A frame that matched no known pattern
    Unknown {
        raw: Vec<u8>,
    },
    /// A known command whose text arguments are not valid UTF-8
    BadEncoding {
        command: &'static str,
        raw: Vec<u8>,
    },
    /// A known command with an unparsable numeric field
    Malformed {
        raw: Vec<u8>,
        error: CodecError,
    },
}

impl Message {
    /// Short name of the message type, used in logs and protocol errors.
    pub fn name(&self) -> &'static str {
        match self {
            Message::KeepAlive => "KeepAlive",
            Message::Lock { .. } => "Lock",
            Message::Key { .. } => "Key",
            Message::ValidateNick { .. } => "ValidateNick",
            Message::ValidateDenied { .. } => "ValidateDenide",
            Message::GetPass => "GetPass",
            Message::MyPass { .. } => "MyPass",
            Message::BadPass => "BadPass",
            Message::HubName { .. } => "HubName",
            Message::HubIsFull => "HubIsFull",
            Message::HubTopic { .. } => "HubTopic",
            Message::Hello { .. } => "Hello",
            Message::Version { .. } => "Version",
            Message::GetNickList => "GetNickList",
            Message::NickList { .. } => "NickList",
            Message::OpList { .. } => "OpList",
            Message::BotList { .. } => "BotList",
            Message::MyInfo(_) => "MyINFO",
            Message::GetInfo { .. } => "GetINFO",
            Message::UserIp { .. } => "UserIP",
            Message::Quit { .. } => "Quit",
            Message::ConnectToMe { .. } => "ConnectToMe",
            Message::RevConnectToMe { .. } => "RevConnectToMe",
            Message::Search(_) => "Search",
            Message::SearchResult(_) => "SR",
            Message::PrivateMessage { .. } => "To",
            Message::Chat { .. } => "Chat",
            Message::MyNick { .. } => "MyNick",
            Message::Supports { .. } => "Supports",
            Message::Direction { .. } => "Direction",
            Message::Get { .. } => "Get",
            Message::Send => "Send",
            Message::FileLength { .. } => "FileLength",
            Message::GetListLen => "GetListLen",
            Message::MaxedOut => "MaxedOut",
            Message::Error { .. } => "Error",
            Message::Failed { .. } => "Failed",
            Message::AdcGet(_) => "ADCGET",
            Message::AdcSnd(_) => "ADCSND",
            Message::UGetBlock { .. } => "UGetBlock",
            Message::UGetZBlock { .. } => "UGetZBlock",
            Message::Sending { .. } => "Sending",
            Message::Cancel => "Cancel",
            Message::Canceled => "Canceled",
            Message::Unknown { .. } => "Unknown",
            Message::BadEncoding { .. } => "BadEncoding",
            Message::Malformed { .. } => "Malformed",
        }
    }
}
