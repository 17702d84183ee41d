use serde::de::DeserializeOwned;

#[derive(Debug, PartialEq)]
pub struct ServerSentEvent<T> {
    pub id: Option<String>,
    pub event: Option<String>,
    pub retry: Option<usize>,
    pub comment: Option<String>,
    pub data: Option<T>,
}

impl<T> ServerSentEvent<T>
where
    T: DeserializeOwned,
{
    /// Parses a single event block. Multiple `data:` lines are joined with a newline before decoding.
    pub fn from_str(s: &str) -> Result<ServerSentEvent<T>, serde_json::Error> {
        let mut id = None;
        let mut event = None;
        let mut retry = None;
        let mut comment = None;
        let mut data_lines: Vec<&str> = Vec::new();

        for line in s.lines() {
            if let Some(comment_str) = line.strip_prefix(':') {
                comment = Some(comment_str.trim().to_string());
                continue;
            }

            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.trim();
            match field {
                "id" => id = Some(value.to_string()),
                "event" => event = Some(value.to_string()),
                "retry" => retry = value.parse::<usize>().ok(),
                "data" => data_lines.push(value),
                _ => {}
            }
        }

        let data = if data_lines.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&data_lines.join("\n"))?)
        };

        Ok(ServerSentEvent {
            id,
            event,
            retry,
            comment,
            data,
        })
    }
}

/// Collects stream chunks and hands out complete event blocks, which end with a blank line.
#[derive(Debug, Default)]
pub struct EventBuffer {
    pending: Vec<u8>,
}

impl EventBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend(chunk.iter().filter(|byte| **byte != b'\r'));

        let mut blocks = Vec::new();
        while let Some(end) = self.pending.windows(2).position(|window| window == b"\n\n") {
            let block: Vec<u8> = self.pending.drain(..end + 2).take(end).collect();
            let block = String::from_utf8_lossy(&block).into_owned();
            if !block.trim().is_empty() {
                blocks.push(block);
            }
        }
        blocks
    }
}
