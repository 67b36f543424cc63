//! Metric identity: a metric group plus ordered tag pairs, and its raw
//! binary form carried inside [`MetricRow`](crate::row::MetricRow).
//!
//! Raw layout (all lengths are big-endian `u32`):
//!
//! ```text
//! [group_len][group bytes] ([key_len][key bytes][value_len][value bytes])*
//! ```

use std::fmt;

use crate::error::{AggrError, AggrResult};

/// A single tag of a metric name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Tag {
    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.key.clear();
        self.key.extend_from_slice(key);
        self.value.clear();
        self.value.extend_from_slice(value);
    }
}

/// Decoded metric identity.
///
/// The struct is meant to be reused: [`MetricName::reset`] keeps the tag
/// buffers around so that decoding the next row does not allocate once the
/// buffers have grown to fit.
#[derive(Debug, Clone, Default)]
pub struct MetricName {
    metric_group: Vec<u8>,
    tags: Vec<Tag>,
    tags_len: usize,
}

impl MetricName {
    /// Create an empty metric name
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a metric name from a group and tag pairs
    pub fn from_parts<G, K, V>(metric_group: G, tags: &[(K, V)]) -> Self
    where
        G: AsRef<[u8]>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut mn = Self::new();
        mn.set_metric_group(metric_group.as_ref());
        for (key, value) in tags {
            mn.add_tag(key.as_ref(), value.as_ref());
        }
        mn
    }

    /// Clear the name while retaining allocated buffers
    pub fn reset(&mut self) {
        self.metric_group.clear();
        self.tags_len = 0;
    }

    pub fn metric_group(&self) -> &[u8] {
        &self.metric_group
    }

    pub fn set_metric_group(&mut self, group: &[u8]) {
        self.metric_group.clear();
        self.metric_group.extend_from_slice(group);
    }

    /// Tags in insertion order
    pub fn tags(&self) -> &[Tag] {
        &self.tags[..self.tags_len]
    }

    /// Add a tag, replacing the value of an existing tag with the same key.
    ///
    /// An empty key sets the metric group instead.
    pub fn add_tag(&mut self, key: &[u8], value: &[u8]) {
        if key.is_empty() {
            self.set_metric_group(value);
            return;
        }
        if let Some(existing) = self.tags[..self.tags_len]
            .iter_mut()
            .find(|tag| tag.key == key)
        {
            existing.value.clear();
            existing.value.extend_from_slice(value);
            return;
        }
        self.push_tag(key, value);
    }

    fn push_tag(&mut self, key: &[u8], value: &[u8]) {
        if self.tags_len < self.tags.len() {
            self.tags[self.tags_len].set(key, value);
        } else {
            self.tags.push(Tag {
                key: key.to_vec(),
                value: value.to_vec(),
            });
        }
        self.tags_len += 1;
    }

    /// Sort tags by key
    pub fn sort_tags(&mut self) {
        self.tags[..self.tags_len].sort_unstable_by(|a, b| a.key.cmp(&b.key));
    }

    /// Append the raw binary form of this name to `dst`
    pub fn marshal_raw(&self, dst: &mut Vec<u8>) {
        write_chunk(dst, &self.metric_group);
        for tag in self.tags() {
            write_chunk(dst, &tag.key);
            write_chunk(dst, &tag.value);
        }
    }

    /// Replace the contents of this name with the decoded form of `src`
    pub fn unmarshal_raw(&mut self, src: &[u8]) -> AggrResult<()> {
        self.reset();

        let (group, mut rest) = read_chunk(src, "metric group")?;
        self.set_metric_group(group);

        while !rest.is_empty() {
            let (key, tail) = read_chunk(rest, "tag key")?;
            let (value, tail) = read_chunk(tail, "tag value")?;
            if key.is_empty() {
                return Err(AggrError::decode("empty tag key"));
            }
            if self.tags().iter().any(|tag| tag.key == key) {
                return Err(AggrError::decode(format!(
                    "duplicate tag key {:?}",
                    String::from_utf8_lossy(key)
                )));
            }
            self.push_tag(key, value);
            rest = tail;
        }

        Ok(())
    }

    /// Number of bytes held by the name and its retained tag buffers
    pub fn capacity_bytes(&self) -> usize {
        self.metric_group.capacity()
            + self
                .tags
                .iter()
                .map(|tag| tag.key.capacity() + tag.value.capacity())
                .sum::<usize>()
    }
}

impl PartialEq for MetricName {
    fn eq(&self, other: &Self) -> bool {
        self.metric_group == other.metric_group && self.tags() == other.tags()
    }
}

impl Eq for MetricName {}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", String::from_utf8_lossy(&self.metric_group))?;
        for (i, tag) in self.tags().iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(
                f,
                "{}={:?}",
                String::from_utf8_lossy(&tag.key),
                String::from_utf8_lossy(&tag.value)
            )?;
        }
        write!(f, "}}")
    }
}

fn write_chunk(dst: &mut Vec<u8>, chunk: &[u8]) {
    dst.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
    dst.extend_from_slice(chunk);
}

fn read_chunk<'a>(src: &'a [u8], what: &str) -> AggrResult<(&'a [u8], &'a [u8])> {
    if src.len() < 4 {
        return Err(AggrError::decode(format!(
            "too short for {} length: {} bytes left",
            what,
            src.len()
        )));
    }
    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    let rest = &src[4..];
    if rest.len() < len {
        return Err(AggrError::decode(format!(
            "too short for {}: need {} bytes, {} left",
            what,
            len,
            rest.len()
        )));
    }
    Ok(rest.split_at(len))
}
