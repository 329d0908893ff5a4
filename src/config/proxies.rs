//! `[[proxies]]` blocks of the client file, edited in place.
//!
//! The file is never re-encoded as a whole: each block is located by byte
//! span and only that span is rewritten, so comments and formatting of the
//! other blocks and of the global section stay exactly as the user left them.

use std::{fs, io, ops::Range, path::PathBuf};

use serde::Deserialize;

use crate::{
    config::{
        codec::{self, CodecError},
        schema::ProxyEntry,
        store::{ConfigError, ConfigStore},
    },
    role::Role,
};

const BLOCK_HEADER: &str = "proxies";

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("a proxy named '{0}' already exists")]
    DuplicateName(String),
    #[error("no proxy named '{0}'")]
    NotFound(String),
    #[error("proxy name must not be empty")]
    EmptyName,
    #[error("failed to encode proxy: {0}")]
    Encode(#[from] CodecError),
    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Store(#[from] ConfigError),
}

/// One `[[proxies]]` block located in the client file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawBlock {
    /// From the header through the last non-blank, non-comment line.
    pub span: Range<usize>,
    /// `span` plus the comments and blank lines up to the next header that
    /// ends the block, or EOF.
    pub extent: Range<usize>,
}

impl RawBlock {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.clone()]
    }

    /// The block with its trailing comments, as carried over by a global write.
    pub fn full_text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.extent.clone()]
    }

    /// Decodes the block as a standalone document.
    pub fn decode(&self, source: &str) -> Result<ProxyEntry, CodecError> {
        #[derive(Deserialize, Default)]
        struct BlockDocument {
            #[serde(default)]
            proxies: Vec<ProxyEntry>,
        }

        let document: BlockDocument = codec::decode(self.text(source))?;
        document
            .proxies
            .into_iter()
            .next()
            .ok_or(CodecError::NotATable)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockLayout {
    /// Everything before the first block.
    pub preamble: Range<usize>,
    pub blocks: Vec<RawBlock>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OpenString {
    Basic,
    Literal,
}

/// Tracks whether the next line continues a value started earlier, in which
/// case a leading `[` is data rather than a table header.
#[derive(Default)]
struct LineScanner {
    open_string: Option<OpenString>,
    depth: usize,
}

impl LineScanner {
    fn in_continuation(&self) -> bool {
        self.open_string.is_some() || self.depth > 0
    }

    fn feed(&mut self, line: &str) {
        let bytes = line.as_bytes();
        let mut index = 0;
        while index < bytes.len() {
            if let Some(open) = self.open_string {
                index = self.close_string(bytes, index, open);
                continue;
            }
            match bytes[index] {
                b'#' => break,
                b'"' if bytes[index..].starts_with(b"\"\"\"") => {
                    self.open_string = Some(OpenString::Basic);
                    index += 3;
                }
                b'\'' if bytes[index..].starts_with(b"'''") => {
                    self.open_string = Some(OpenString::Literal);
                    index += 3;
                }
                b'"' => index = skip_basic_string(bytes, index + 1),
                b'\'' => {
                    index = bytes[index + 1..]
                        .iter()
                        .position(|&byte| byte == b'\'')
                        .map_or(bytes.len(), |offset| index + 1 + offset + 1);
                }
                b'[' | b'{' => {
                    self.depth += 1;
                    index += 1;
                }
                b']' | b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    index += 1;
                }
                _ => index += 1,
            }
        }
    }

    fn close_string(&mut self, bytes: &[u8], mut index: usize, open: OpenString) -> usize {
        let (delimiter, quote): (&[u8], u8) = match open {
            OpenString::Basic => (b"\"\"\"", b'"'),
            OpenString::Literal => (b"'''", b'\''),
        };
        while index < bytes.len() {
            if open == OpenString::Basic && bytes[index] == b'\\' {
                index += 2;
                continue;
            }
            if bytes[index..].starts_with(delimiter) {
                self.open_string = None;
                index += delimiter.len();
                // Up to two quotes may directly precede the closing delimiter.
                while index < bytes.len() && bytes[index] == quote {
                    index += 1;
                }
                return index;
            }
            index += 1;
        }
        index
    }
}

fn skip_basic_string(bytes: &[u8], mut index: usize) -> usize {
    while index < bytes.len() {
        match bytes[index] {
            b'\\' => index += 2,
            b'"' => return index + 1,
            _ => index += 1,
        }
    }
    index
}

struct Header {
    name: String,
    array: bool,
}

fn parse_header(line: &str) -> Option<Header> {
    let trimmed = line.trim_start();
    let (inner, array) = if let Some(rest) = trimmed.strip_prefix("[[") {
        (&rest[..rest.find("]]")?], true)
    } else if let Some(rest) = trimmed.strip_prefix('[') {
        (&rest[..rest.find(']')?], false)
    } else {
        return None;
    };
    let name = inner
        .split('.')
        .map(|part| part.trim().trim_matches('"').trim_matches('\''))
        .collect::<Vec<_>>()
        .join(".");
    Some(Header { name, array })
}

fn is_content(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

/// Splits `text` into the global preamble and its `[[proxies]]` blocks.
///
/// A block runs from its header until the next header that is not a
/// `proxies.*` sub-table. Headers are only recognized outside multi-line
/// strings and arrays.
pub fn scan(text: &str) -> BlockLayout {
    let mut scanner = LineScanner::default();
    let mut blocks = Vec::new();
    let mut current: Option<RawBlock> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let continuing = scanner.in_continuation();

        if !continuing && let Some(header) = parse_header(line) {
            if header.array && header.name == BLOCK_HEADER {
                blocks.extend(current.take());
                current = Some(RawBlock {
                    span: line_start..offset,
                    extent: line_start..offset,
                });
            } else if let Some(block) = current.as_mut()
                && header.name.starts_with("proxies.")
            {
                block.span.end = offset;
                block.extent.end = offset;
            } else {
                blocks.extend(current.take());
            }
            continue;
        }

        scanner.feed(line);
        if let Some(block) = current.as_mut() {
            block.extent.end = offset;
            if continuing || is_content(line) {
                block.span.end = offset;
            }
        }
    }
    blocks.extend(current.take());

    let preamble_end = blocks.first().map_or(text.len(), |block| block.span.start);
    BlockLayout {
        preamble: 0..preamble_end,
        blocks,
    }
}

/// Decodes every block, skipping the ones that do not parse.
pub fn decode_all(text: &str) -> Vec<(RawBlock, ProxyEntry)> {
    scan(text)
        .blocks
        .into_iter()
        .filter_map(|block| match block.decode(text) {
            Ok(entry) => Some((block, entry)),
            Err(error) => {
                log::warn!(
                    "[proxies] skipping undecodable block at byte {}: {error}",
                    block.span.start
                );
                None
            }
        })
        .collect()
}

fn collapse_blank_lines(text: &str) -> String {
    let mut collapsed = String::with_capacity(text.len());
    let mut newlines = 0;
    for character in text.chars() {
        if character == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        collapsed.push(character);
    }
    collapsed
}

/// CRUD over the proxy blocks of the client file.
#[derive(Clone, Debug)]
pub struct ProxyStore {
    store: ConfigStore,
}

impl ProxyStore {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Result<Vec<ProxyEntry>, ProxyError> {
        let text = self.load()?;
        Ok(decode_all(&text)
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }

    pub fn get(&self, name: &str) -> Result<Option<ProxyEntry>, ProxyError> {
        let text = self.load()?;
        Ok(find(&text, name).map(|(_, entry)| entry))
    }

    pub fn add(&self, entry: &ProxyEntry) -> Result<(), ProxyError> {
        if entry.name.trim().is_empty() {
            return Err(ProxyError::EmptyName);
        }
        let text = self.load()?;
        if find(&text, &entry.name).is_some() {
            return Err(ProxyError::DuplicateName(entry.name.clone()));
        }
        let block = codec::encode_block(BLOCK_HEADER, entry)?;
        let updated = format!("{}\n\n{block}\n", text.trim_end());
        self.store.write_text(Role::Client, &updated)?;
        log::info!("[proxies] added {} ({})", entry.name, entry.kind);
        Ok(())
    }

    /// Replaces the block named `name`. The entry may carry a new name as long
    /// as no other block already uses it.
    pub fn update(&self, name: &str, entry: &ProxyEntry) -> Result<(), ProxyError> {
        if entry.name.trim().is_empty() {
            return Err(ProxyError::EmptyName);
        }
        let text = self.load()?;
        let (block, _) = find(&text, name).ok_or_else(|| ProxyError::NotFound(name.to_string()))?;
        if entry.name != name && find(&text, &entry.name).is_some() {
            return Err(ProxyError::DuplicateName(entry.name.clone()));
        }

        let mut replacement = codec::encode_block(BLOCK_HEADER, entry)?;
        if block.text(&text).ends_with('\n') {
            replacement.push('\n');
        }
        let mut updated = text.clone();
        updated.replace_range(block.span, &replacement);
        self.store.write_text(Role::Client, &updated)?;
        log::info!("[proxies] updated {name}");
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<(), ProxyError> {
        let text = self.load()?;
        let (block, _) = find(&text, name).ok_or_else(|| ProxyError::NotFound(name.to_string()))?;
        let mut updated = text.clone();
        updated.replace_range(block.span, "");
        self.store.write_text(Role::Client, &collapse_blank_lines(&updated))?;
        log::info!("[proxies] deleted {name}");
        Ok(())
    }

    fn load(&self) -> Result<String, ProxyError> {
        let path = self.store.ensure(Role::Client)?;
        fs::read_to_string(&path).map_err(|source| ProxyError::Io { path, source })
    }
}

fn find(text: &str, name: &str) -> Option<(RawBlock, ProxyEntry)> {
    decode_all(text)
        .into_iter()
        .find(|(_, entry)| entry.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::schema::ProxyKind, paths::Paths};

    fn store_with(text: &str) -> (tempfile::TempDir, ProxyStore, PathBuf) {
        let directory = tempfile::tempdir().unwrap();
        let config = ConfigStore::new(Paths::new(directory.path()));
        let path = config.config_path(Role::Client);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
        (directory, ProxyStore::new(config), path)
    }

    fn tcp(name: &str, local_port: i64) -> ProxyEntry {
        ProxyEntry {
            local_ip: Some("127.0.0.1".into()),
            local_port: Some(local_port),
            ..ProxyEntry::new(name, ProxyKind::Tcp)
        }
    }

    #[test]
    fn test_scan_finds_blocks_and_sub_tables() {
        let text = "serverAddr = \"a\"\n\n[[proxies]]\nname = \"a\"\ntype = \"tcp\"\n[proxies.plugin]\ntype = \"socks5\"\n\n# trailing note\n[webServer]\nport = 7400\n\n[[proxies]]\nname = \"b\"\ntype = \"udp\"";
        let layout = scan(text);
        assert_eq!(layout.blocks.len(), 2);
        assert_eq!(&text[layout.preamble.clone()], "serverAddr = \"a\"\n\n");
        assert_eq!(
            layout.blocks[0].text(text),
            "[[proxies]]\nname = \"a\"\ntype = \"tcp\"\n[proxies.plugin]\ntype = \"socks5\"\n"
        );
        assert_eq!(layout.blocks[1].text(text), "[[proxies]]\nname = \"b\"\ntype = \"udp\"");
        assert_eq!(
            layout.blocks[0].full_text(text),
            "[[proxies]]\nname = \"a\"\ntype = \"tcp\"\n[proxies.plugin]\ntype = \"socks5\"\n\n# trailing note\n"
        );
        assert_eq!(layout.blocks[1].full_text(text), layout.blocks[1].text(text));
        assert_eq!(layout.blocks[0].decode(text).unwrap().extra["plugin"]["type"], "socks5");
    }

    #[test]
    fn test_delimiter_inside_values_does_not_split_blocks() {
        let text = concat!(
            "[[proxies]]\n",
            "name = \"quoted\"\n",
            "type = \"http\"\n",
            "hostHeaderRewrite = \"[[proxies]]\"\n",
            "metadatas.note = \"\"\"\n",
            "[[proxies]]\n",
            "[webServer]\n",
            "\"\"\"\n",
            "locations = [\n",
            "  \"/a\",\n",
            "]\n",
            "\n",
            "[[proxies]]\n",
            "name = \"second\"\n",
            "type = \"tcp\"\n",
        );
        let entries = decode_all(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1.name, "quoted");
        assert_eq!(entries[0].1.host_header_rewrite.as_deref(), Some("[[proxies]]"));
        assert_eq!(entries[0].1.locations, Some(vec!["/a".to_string()]));
        assert_eq!(entries[1].1.name, "second");
    }

    #[test]
    fn test_add_proxy_scenario() {
        let (_directory, store, path) = store_with("serverAddr = \"x\"\nserverPort = 7000\n");
        let entry = ProxyEntry {
            local_ip: Some("127.0.0.1".into()),
            local_port: Some(22),
            remote_port: Some(6000),
            ..ProxyEntry::new("ssh", ProxyKind::Tcp)
        };
        store.add(&entry).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "serverAddr = \"x\"\nserverPort = 7000\n\n[[proxies]]\nname = \"ssh\"\ntype = \"tcp\"\nlocalIP = \"127.0.0.1\"\nlocalPort = 22\nremotePort = 6000\n"
        );
        assert!(matches!(
            store.add(&entry),
            Err(ProxyError::DuplicateName(name)) if name == "ssh"
        ));
        assert_eq!(store.list().unwrap(), vec![entry]);
    }

    #[test]
    fn test_update_touches_only_one_block() {
        let original = "serverAddr = \"x\"\n\n# web one\n[[proxies]]\nname   =   \"web1\"   # odd spacing\ntype = \"tcp\"\nlocalPort = 80\n\n\n[[proxies]]\nname = \"web2\"\ntype = \"tcp\"\nlocalPort = 81\n";
        let (_directory, store, path) = store_with(original);

        store.update("web2", &tcp("web2", 8081)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "serverAddr = \"x\"\n\n# web one\n[[proxies]]\nname   =   \"web1\"   # odd spacing\ntype = \"tcp\"\nlocalPort = 80\n\n\n[[proxies]]\nname = \"web2\"\ntype = \"tcp\"\nlocalIP = \"127.0.0.1\"\nlocalPort = 8081\n"
        );
    }

    #[test]
    fn test_update_rejects_rename_onto_existing_name() {
        let (_directory, store, _path) =
            store_with("[[proxies]]\nname = \"a\"\ntype = \"tcp\"\n\n[[proxies]]\nname = \"b\"\ntype = \"tcp\"\n");
        assert!(matches!(
            store.update("a", &tcp("b", 1)),
            Err(ProxyError::DuplicateName(_))
        ));
        assert!(matches!(
            store.update("missing", &tcp("missing", 1)),
            Err(ProxyError::NotFound(_))
        ));
        store.update("a", &tcp("c", 1)).unwrap();
        let names: Vec<String> = store.list().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["c", "b"]);
    }

    #[test]
    fn test_delete_collapses_blank_lines() {
        let (_directory, store, path) = store_with(
            "serverAddr = \"x\"\n\n[[proxies]]\nname = \"a\"\ntype = \"tcp\"\n\n[[proxies]]\nname = \"b\"\ntype = \"tcp\"\n\n[[proxies]]\nname = \"c\"\ntype = \"tcp\"\n",
        );
        store.delete("b").unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "serverAddr = \"x\"\n\n[[proxies]]\nname = \"a\"\ntype = \"tcp\"\n\n[[proxies]]\nname = \"c\"\ntype = \"tcp\"\n"
        );
        assert!(matches!(store.delete("b"), Err(ProxyError::NotFound(_))));
    }

    #[test]
    fn test_undecodable_block_is_skipped() {
        let (_directory, store, _path) = store_with(
            "[[proxies]]\nname = \"good\"\ntype = \"tcp\"\n\n[[proxies]]\ntype = \"tcp\"\n",
        );
        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "good");
        assert!(store.get("good").unwrap().is_some());
        assert!(store.get("other").unwrap().is_none());
    }

    #[test]
    fn test_missing_file_gets_defaults_before_mutation() {
        let directory = tempfile::tempdir().unwrap();
        let config = ConfigStore::new(Paths::new(directory.path()));
        let store = ProxyStore::new(config.clone());
        store.add(&tcp("first", 22)).unwrap();
        let text = fs::read_to_string(config.config_path(Role::Client)).unwrap();
        assert!(text.starts_with("serverAddr = \"127.0.0.1\"\n"));
        assert!(text.ends_with("[[proxies]]\nname = \"first\"\ntype = \"tcp\"\nlocalIP = \"127.0.0.1\"\nlocalPort = 22\n"));
    }
}
