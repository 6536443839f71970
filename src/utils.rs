use std::{fmt::Display, ops::Deref};

use annotate_snippets::snippet::{AnnotationType, Slice, SourceAnnotation};

/// 位置信息片段
///
/// 只记录字节范围，源码在渲染诊断信息时再提供。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Span<T> {
    inner: T,
    pub start: usize,
    pub end: usize,
}

impl<T: Display> Display for Span<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl<T> Deref for Span<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> AsRef<T> for Span<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

impl<T> From<T> for Span<T> {
    fn from(inner: T) -> Self {
        Self::new(inner, 0, 0)
    }
}

impl From<&str> for Span<String> {
    fn from(inner: &str) -> Self {
        Self::new(inner.to_string(), 0, 0)
    }
}

impl<T> Span<T> {
    /// 创建一个新的 `Span`。
    pub fn new(inner: T, start: usize, end: usize) -> Self {
        Self { inner, start, end }
    }

    pub fn from_pest(inner: T, span: pest::Span<'_>) -> Self {
        Self::new(inner, span.start(), span.end())
    }

    /// 转换为内部类型。
    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn lines<'a>(&self, filename: &'a str, source: &'a str) -> Option<LinesInfo<'a>> {
        // 输入末尾的位置指向最后一个非空行的行尾
        let (from, to) = if self.start >= source.len() {
            let end = source.trim_end().len();
            (end, end)
        } else {
            (self.start, self.end.max(self.start))
        };

        let mut start = 0;
        let mut line_start = 0;
        for (i, line) in source.split_inclusive('\n').enumerate() {
            let next = start + line.len();
            if next > from || next == source.len() {
                line_start = i + 1;
                break;
            }
            start = next;
        }
        if line_start == 0 {
            return None;
        }

        let mut end = start;
        for line in source[start..].split_inclusive('\n') {
            end += line.len();
            if end >= to {
                break;
            }
        }

        Some(LinesInfo {
            filename,
            source: &source[start..end],
            line_start,
            range: (from - start, to - start),
        })
    }
}

/// 所在行的信息
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinesInfo<'a> {
    /// 文件名
    pub filename: &'a str,
    /// 包含 Span 的某几行
    pub source: &'a str,
    /// 起始行号
    pub line_start: usize,
    /// Span 在 source 中的切片
    pub range: (usize, usize),
}

impl<'a> LinesInfo<'a> {
    pub fn as_annotation(&self, message: &'a str, annotation_type: AnnotationType) -> Slice<'a> {
        Slice {
            source: self.source,
            line_start: self.line_start,
            origin: Some(self.filename),
            annotations: vec![SourceAnnotation {
                range: self.range,
                label: message,
                annotation_type,
            }],
            fold: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locates_the_line_of_a_span() {
        let source = "service DB:\n  operation Select:\n    think 5\n";
        let start = source.find("Select").unwrap();
        let span = Span::new("Select", start, start + 6);

        let lines = span.lines("test.mad", source).unwrap();
        assert_eq!(lines.line_start, 2);
        assert_eq!(lines.source, "  operation Select:\n");
        assert_eq!(&lines.source[lines.range.0..lines.range.1], "Select");
    }

    #[test]
    fn end_of_input_points_after_the_last_line() {
        let source = "service DB:\n  operation Select:\n\n";
        let span = Span::new((), source.len(), source.len());

        let lines = span.lines("test.mad", source).unwrap();
        assert_eq!(lines.line_start, 2);
        assert_eq!(lines.source, "  operation Select:\n");
        assert_eq!(lines.range, (19, 19));

        let source = "service DB:";
        let lines = Span::new((), 11, 11).lines("test.mad", source).unwrap();
        assert_eq!((lines.line_start, lines.range), (1, (11, 11)));
    }

    #[test]
    fn empty_source_has_no_lines() {
        assert_eq!(Span::new((), 0, 0).lines("test.mad", ""), None);
    }

    #[test]
    fn unlocated_spans_compare_by_value() {
        let left: Span<String> = "DB".into();
        assert_eq!(*left, "DB");
        assert_eq!(left.into_inner(), "DB");
    }
}
