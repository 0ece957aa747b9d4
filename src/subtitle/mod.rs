//! Subtitle cues shared between the input and video transform threads
//!
//! The input thread decodes subtitle packets into cues and inserts them
//! here; the video transform looks up whatever is showing at each frame's
//! position. Text cues also drive the teletext sink.

/// What a track carries; decided by the first cue inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleKind {
    Text,
    Bitmap,
}

/// ARGB image ready for compositing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleBitmap {
    pub width: u32,
    pub height: u32,

    /// Row-major 0xAARRGGBB pixels
    pub pixels: Vec<u32>,
}

/// Payload of one cue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtitleContent {
    Text(String),
    Bitmap(SubtitleBitmap),
}

/// One subtitle event with its display window in milliseconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleCue {
    pub start_ms: i64,
    pub end_ms: i64,
    pub content: SubtitleContent,
}

impl SubtitleCue {
    pub fn text(start_ms: i64, end_ms: i64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            content: SubtitleContent::Text(text.into()),
        }
    }

    pub fn bitmap(start_ms: i64, end_ms: i64, bitmap: SubtitleBitmap) -> Self {
        Self {
            start_ms,
            end_ms,
            content: SubtitleContent::Bitmap(bitmap),
        }
    }

    pub fn kind(&self) -> SubtitleKind {
        match self.content {
            SubtitleContent::Text(_) => SubtitleKind::Text,
            SubtitleContent::Bitmap(_) => SubtitleKind::Bitmap,
        }
    }

    fn covers(&self, ms: i64) -> bool {
        self.start_ms <= ms && ms < self.end_ms
    }
}

/// Time-ordered cues
#[derive(Debug, Default)]
pub struct SubtitleTrack {
    cues: Vec<SubtitleCue>,
    kind: Option<SubtitleKind>,
}

impl SubtitleTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a cue, keeping the track ordered by start time
    ///
    /// Cues of a different kind than the track's are ignored.
    pub fn insert(&mut self, cue: SubtitleCue) {
        let kind = *self.kind.get_or_insert(cue.kind());
        if cue.kind() != kind {
            return;
        }

        let at = self.cues.partition_point(|c| c.start_ms <= cue.start_ms);
        self.cues.insert(at, cue);
    }

    pub fn kind(&self) -> Option<SubtitleKind> {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// The latest-starting cue showing at `ms`
    pub fn cue_at(&self, ms: i64) -> Option<&SubtitleCue> {
        let end = self.cues.partition_point(|c| c.start_ms <= ms);
        self.cues[..end].iter().rev().find(|c| c.covers(ms))
    }

    pub fn text_at(&self, ms: i64) -> Option<&str> {
        match &self.cue_at(ms)?.content {
            SubtitleContent::Text(text) => Some(text),
            SubtitleContent::Bitmap(_) => None,
        }
    }

    pub fn bitmap_at(&self, ms: i64) -> Option<&SubtitleBitmap> {
        match &self.cue_at(ms)?.content {
            SubtitleContent::Bitmap(bitmap) => Some(bitmap),
            SubtitleContent::Text(_) => None,
        }
    }

    /// Drop cues that ended at or before `ms`
    pub fn prune_before(&mut self, ms: i64) {
        self.cues.retain(|c| c.end_ms > ms);
    }
}

/// Palettised subtitle rectangle as produced by bitmap subtitle decoders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteRect {
    pub width: u32,
    pub height: u32,

    /// Row-major palette indices, `width * height` long
    pub indices: Vec<u8>,

    /// 0xAARRGGBB entries
    pub palette: Vec<u32>,
}

/// Stack palette rectangles top to bottom into one ARGB bitmap
///
/// Rectangles wider than `active_width` are decimated by the nearest
/// integer factor. Palette index 0 is transparent.
pub fn compose_bitmap(rects: &[PaletteRect], active_width: u32) -> SubtitleBitmap {
    let active_width = active_width.max(1);
    let scaled: Vec<(u32, u32, u32)> = rects
        .iter()
        .map(|r| {
            let scale = ((r.width as f64 / active_width as f64).round() as u32).max(1);
            (scale, r.width / scale, r.height / scale)
        })
        .collect();

    let width = scaled.iter().map(|&(_, w, _)| w).max().unwrap_or(0);
    let height = scaled.iter().map(|&(_, _, h)| h).sum();
    let mut pixels = vec![0u32; width as usize * height as usize];

    let mut top = 0usize;
    for (rect, &(scale, w, h)) in rects.iter().zip(&scaled) {
        for y in 0..h as usize {
            let src_row = y * scale as usize * rect.width as usize;
            let dst_row = (top + y) * width as usize;

            for x in 0..w as usize {
                let index = rect.indices.get(src_row + x * scale as usize).copied().unwrap_or(0);
                if index == 0 {
                    continue;
                }
                pixels[dst_row + x] = rect.palette.get(index as usize).copied().unwrap_or(0);
            }
        }
        top += h as usize;
    }

    SubtitleBitmap {
        width,
        height,
        pixels,
    }
}

/// Displayable text of an ASS "Dialogue" event
///
/// Decoders hand text subtitles over as ASS events: eight comma-separated
/// fields, then the text. Override blocks (`{...}`) are removed and `\N`
/// line breaks become newlines. Input that is not an event is returned
/// unchanged apart from the same clean-up.
pub fn ass_dialogue_text(event: &str) -> String {
    // Legacy "Dialogue:" lines carry one extra leading field
    let (event, fields) = match event.strip_prefix("Dialogue:") {
        Some(rest) => (rest, 10),
        None => (event, 9),
    };
    let text = event.splitn(fields, ',').nth(fields - 1).unwrap_or(event);

    let mut out = String::with_capacity(text.len());
    let mut in_override = false;
    let mut chars = text.trim_end_matches(['\r', '\n']).chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' => in_override = true,
            '}' if in_override => in_override = false,
            _ if in_override => {}
            '\\' if matches!(chars.peek(), Some('N') | Some('n')) => {
                chars.next();
                out.push('\n');
            }
            _ => out.push(c),
        }
    }

    out
}
