//! ICY (SHOUTcast) inline metadata demuxing
//!
//! When a server answers `icy-metaint: N`, every N audio bytes are followed by
//! one length byte (x16) and that many bytes of `StreamTitle='...';` text.

/// Track information carried by a stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMetadata {
    pub title: String,
    pub artist: String,
}

impl StreamMetadata {
    /// Split an ICY `StreamTitle` of the form `Artist - Title`
    pub fn from_stream_title(raw: &str) -> Self {
        match raw.split_once(" - ") {
            Some((artist, title)) => Self {
                title: title.trim().to_string(),
                artist: artist.trim().to_string(),
            },
            None => Self {
                title: raw.trim().to_string(),
                artist: String::new(),
            },
        }
    }
}

enum State {
    Audio { remaining: usize },
    Length,
    Meta { remaining: usize },
}

/// Separates audio bytes from interleaved metadata blocks
pub struct IcyDemuxer {
    metaint: usize,
    state: State,
    meta: Vec<u8>,
}

impl IcyDemuxer {
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint,
            state: State::Audio { remaining: metaint },
            meta: Vec::new(),
        }
    }

    /// Feed raw bytes; audio is appended to `audio`, decoded titles are returned
    pub fn feed(&mut self, input: &[u8], audio: &mut Vec<u8>) -> Vec<StreamMetadata> {
        let mut found = Vec::new();
        let mut i = 0;
        while i < input.len() {
            match self.state {
                State::Audio { remaining } => {
                    let n = remaining.min(input.len() - i);
                    audio.extend_from_slice(&input[i..i + n]);
                    i += n;
                    self.state = if remaining == n {
                        State::Length
                    } else {
                        State::Audio { remaining: remaining - n }
                    };
                }
                State::Length => {
                    let len = input[i] as usize * 16;
                    i += 1;
                    self.state = if len == 0 {
                        State::Audio { remaining: self.metaint }
                    } else {
                        self.meta.clear();
                        State::Meta { remaining: len }
                    };
                }
                State::Meta { remaining } => {
                    let n = remaining.min(input.len() - i);
                    self.meta.extend_from_slice(&input[i..i + n]);
                    i += n;
                    if remaining == n {
                        if let Some(title) = parse_stream_title(&self.meta) {
                            found.push(StreamMetadata::from_stream_title(&title));
                        }
                        self.state = State::Audio { remaining: self.metaint };
                    } else {
                        self.state = State::Meta { remaining: remaining - n };
                    }
                }
            }
        }
        found
    }
}

fn parse_stream_title(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    let text = text.trim_end_matches('\0');
    let start = text.find("StreamTitle='")? + "StreamTitle='".len();
    let rest = &text[start..];
    let end = rest.find("';").unwrap_or(rest.len());
    let title = rest[..end].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_block(text: &str) -> Vec<u8> {
        let mut body = text.as_bytes().to_vec();
        let padded = body.len().div_ceil(16) * 16;
        body.resize(padded, 0);
        let mut block = vec![(padded / 16) as u8];
        block.extend(body);
        block
    }

    #[test]
    fn test_demux_strips_metadata() {
        let mut stream = vec![1u8; 8];
        stream.extend(meta_block("StreamTitle='Daft Punk - Around the World';"));
        stream.extend(vec![2u8; 8]);
        stream.push(0); // empty metadata block
        stream.extend(vec![3u8; 4]);

        let mut demux = IcyDemuxer::new(8);
        let mut audio = Vec::new();
        let titles = demux.feed(&stream, &mut audio);

        assert_eq!(audio.len(), 20);
        assert!(audio[..8].iter().all(|b| *b == 1));
        assert!(audio[16..].iter().all(|b| *b == 3));
        assert_eq!(
            titles,
            vec![StreamMetadata {
                title: "Around the World".into(),
                artist: "Daft Punk".into(),
            }]
        );
    }

    #[test]
    fn test_demux_across_chunk_boundaries() {
        let mut stream = vec![7u8; 4];
        stream.extend(meta_block("StreamTitle='Station Jingle';"));
        stream.extend(vec![7u8; 4]);

        let mut demux = IcyDemuxer::new(4);
        let mut audio = Vec::new();
        let mut titles = Vec::new();
        for byte in stream.chunks(3) {
            titles.extend(demux.feed(byte, &mut audio));
        }
        assert_eq!(audio, vec![7u8; 8]);
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].title, "Station Jingle");
        assert!(titles[0].artist.is_empty());
    }

    #[test]
    fn test_parse_ignores_empty_title() {
        assert_eq!(parse_stream_title(b"StreamTitle='';\0\0"), None);
        assert_eq!(parse_stream_title(b"StreamUrl='x';"), None);
    }
}
