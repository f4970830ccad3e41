//! Splitting item content into bounded, overlapping segments.

use crate::domain::config::SplitterConfig;

/// Text of one segment and where it starts in the item (in characters)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentText {
  pub content: String,
  pub char_offset: usize,
}

pub trait Segmenter: Send + Sync {
  fn split(&self, content: &str) -> Vec<SegmentText>;
}

/// Character-window splitter.
///
/// Windows are at most `segment_size` characters. When a window would end
/// mid-text, the cut moves back to the last whitespace in the window's second
/// half; with no whitespace there it cuts hard at the window edge. The next
/// window starts `overlap` characters before the cut.
#[derive(Debug, Clone)]
pub struct CharacterSplitter {
  segment_size: usize,
  overlap: usize,
}

impl CharacterSplitter {
  pub fn new(segment_size: usize, overlap: usize) -> Self {
    let segment_size = segment_size.max(1);
    // overlap must leave room for progress
    let overlap = overlap.min(segment_size / 2);
    Self { segment_size, overlap }
  }

  pub fn from_config(config: &SplitterConfig) -> Self {
    Self::new(config.segment_size, config.overlap)
  }

  fn find_cut(&self, chars: &[char], start: usize, end: usize) -> usize {
    let floor = start + self.segment_size / 2;
    (floor + 1..=end)
      .rev()
      .find(|&i| chars[i - 1].is_whitespace())
      .unwrap_or(end)
  }
}

impl Default for CharacterSplitter {
  fn default() -> Self {
    Self::from_config(&SplitterConfig::default())
  }
}

impl Segmenter for CharacterSplitter {
  fn split(&self, content: &str) -> Vec<SegmentText> {
    let chars: Vec<char> = content.chars().collect();
    let len = chars.len();
    let mut segments = Vec::new();
    let mut start = 0;

    while start < len {
      let end = (start + self.segment_size).min(len);
      let cut = if end < len { self.find_cut(&chars, start, end) } else { end };

      let text: String = chars[start..cut].iter().collect();
      let trimmed = text.trim();
      if !trimmed.is_empty() {
        let leading = text.chars().take_while(|c| c.is_whitespace()).count();
        segments.push(SegmentText {
          content: trimmed.to_string(),
          char_offset: start + leading,
        });
      }

      if cut >= len {
        break;
      }
      start = cut.saturating_sub(self.overlap).max(start + 1);
    }

    segments
  }
}
