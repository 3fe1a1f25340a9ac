/// A source location: file ID + byte offset range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub file_id: u16,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file_id: u16, start: u32, end: u32) -> Self {
        Self {
            file_id,
            start,
            end,
        }
    }

    pub fn dummy() -> Self {
        Self {
            file_id: 0,
            start: 0,
            end: 0,
        }
    }

    pub fn is_dummy(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    /// Span covering `line` (trimmed of surrounding whitespace) at byte
    /// `line_start` of its file.
    pub fn of_line(line_start: usize, line: &str) -> Self {
        let lead = line.len() - line.trim_start().len();
        let start = line_start + lead;
        let end = start + line.trim().len();
        Self::new(0, start as u32, end as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_of_line_trims() {
        let span = Span::of_line(10, "  name = \"cpu\"  ");
        assert_eq!(span.start, 12);
        assert_eq!(span.end, 24);
    }

    #[test]
    fn test_dummy() {
        assert!(Span::dummy().is_dummy());
        assert!(!Span::new(0, 4, 8).is_dummy());
    }
}
