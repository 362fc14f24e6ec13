//! Charset detection for entry names that don't declare their encoding.
//!
//! Legacy zips (no UTF-8 flag) and tarballs store names as raw bytes in
//! whatever code page the packer's machine used. The detector pools the raw
//! names of one archive, asks a [`CharsetClassifier`] for a verdict and falls
//! back to a configured charset when the verdict is weak or outside the
//! supported set. The result is computed once per archive.

use std::sync::Arc;

use encoding_rs::{Encoding, BIG5, EUC_KR, GB18030, GBK, SHIFT_JIS, UTF_8, WINDOWS_1252};

use crate::archive::Entry;

/// Charsets a verdict may resolve to.
pub fn supported() -> [&'static Encoding; 7] {
    [UTF_8, GBK, GB18030, SHIFT_JIS, EUC_KR, BIG5, WINDOWS_1252]
}

/// Amount of non-ASCII evidence at which a clean decode counts as certain.
const FULL_EVIDENCE_BYTES: usize = 8;

/// A classifier's opinion about a byte sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub encoding: &'static Encoding,
    /// 0.0 (no idea) to 1.0 (certain)
    pub confidence: f32,
}

/// Anything that can guess the charset of a byte sample.
pub trait CharsetClassifier: Send + Sync {
    fn classify(&self, sample: &[u8]) -> Verdict;
}

/// Statistical classifier backed by `chardetng`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChardetClassifier;

impl CharsetClassifier for ChardetClassifier {
    fn classify(&self, sample: &[u8]) -> Verdict {
        let non_ascii = sample.iter().filter(|b| !b.is_ascii()).count();
        if non_ascii == 0 {
            // Every ASCII-compatible charset decodes this the same way
            return Verdict {
                encoding: WINDOWS_1252,
                confidence: 0.0,
            };
        }

        if std::str::from_utf8(sample).is_ok() {
            return Verdict {
                encoding: UTF_8,
                confidence: 1.0,
            };
        }

        let mut detector = chardetng::EncodingDetector::new();
        detector.feed(sample, true);
        let encoding = detector.guess(None, false);

        let clean = encoding
            .decode_without_bom_handling_and_without_replacement(sample)
            .is_some();
        let evidence = (non_ascii as f32 / FULL_EVIDENCE_BYTES as f32).min(1.0);

        Verdict {
            encoding,
            confidence: if clean { evidence } else { 0.0 },
        }
    }
}

/// The charset chosen for one archive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodingGuess {
    pub encoding: &'static Encoding,
    pub confidence: f32,
    /// Set when the classifier's verdict was not used
    pub fallback: bool,
}

impl EncodingGuess {
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// Decode raw name bytes. Undecodable sequences become U+FFFD rather
    /// than failing the entry.
    pub fn decode(&self, raw: &[u8]) -> String {
        let (text, _had_errors) = self.encoding.decode_without_bom_handling(raw);
        text.into_owned()
    }

    /// Name of an entry under this guess. Entries whose format declared an
    /// encoding keep the provider's name.
    pub fn decode_entry(&self, entry: &Entry) -> String {
        match &entry.raw_name {
            Some(raw) => self.decode(raw),
            None => entry.name.clone(),
        }
    }
}

#[derive(Clone)]
pub struct EncodingDetector {
    classifier: Arc<dyn CharsetClassifier>,
    fallback: &'static Encoding,
    threshold: f32,
}

impl std::fmt::Debug for EncodingDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodingDetector")
            .field("fallback", &self.fallback.name())
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl EncodingDetector {
    pub fn new(
        classifier: Arc<dyn CharsetClassifier>,
        fallback: &'static Encoding,
        threshold: f32,
    ) -> Self {
        Self {
            classifier,
            fallback,
            threshold,
        }
    }

    /// Guess the charset for an archive's entries. `None` when every entry
    /// name was self-declared and no guess is needed.
    pub fn detect(&self, entries: &[Entry]) -> Option<EncodingGuess> {
        let mut sample = Vec::new();
        for raw in entries.iter().filter_map(|e| e.raw_name.as_deref()) {
            sample.extend_from_slice(raw);
            sample.push(b'\n');
        }
        if sample.is_empty() {
            return None;
        }
        Some(self.detect_bytes(&sample))
    }

    pub fn detect_bytes(&self, sample: &[u8]) -> EncodingGuess {
        let verdict = self.classifier.classify(sample);
        let known = supported().contains(&verdict.encoding);

        if known && verdict.confidence >= self.threshold {
            EncodingGuess {
                encoding: verdict.encoding,
                confidence: verdict.confidence,
                fallback: false,
            }
        } else {
            EncodingGuess {
                encoding: self.fallback,
                confidence: verdict.confidence,
                fallback: true,
            }
        }
    }
}

impl Default for EncodingDetector {
    fn default() -> Self {
        Self::new(Arc::new(ChardetClassifier), WINDOWS_1252, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_entries(encoding: &'static Encoding, names: &[&str]) -> Vec<Entry> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let (bytes, _, had_errors) = encoding.encode(name);
                assert!(!had_errors, "{name} not representable");
                Entry {
                    index: i,
                    name: String::from_utf8_lossy(&bytes).into_owned(),
                    raw_name: Some(bytes.into_owned()),
                    size: 0,
                    is_dir: false,
                    encrypted: false,
                }
            })
            .collect()
    }

    fn assert_round_trip(encoding: &'static Encoding, names: &[&str]) {
        let entries = raw_entries(encoding, names);
        let guess = EncodingDetector::default().detect(&entries).unwrap();

        assert_eq!(guess.encoding, encoding, "guessed {}", guess.name());
        assert!(!guess.fallback);
        for (entry, expected) in entries.iter().zip(names) {
            assert_eq!(guess.decode_entry(entry), *expected);
        }
    }

    #[test]
    fn test_shift_jis_names() {
        assert_round_trip(
            SHIFT_JIS,
            &[
                "新しいフォルダ/写真のアルバム.jpg",
                "テスト文書です.txt",
                "日本語のファイル名を使った資料.doc",
                "会議の議事録とスケジュール.xlsx",
            ],
        );
    }

    #[test]
    fn test_gbk_names() {
        assert_round_trip(
            GBK,
            &[
                "新建文件夹/风景照片集合.jpg",
                "中文名称的压缩文件说明.txt",
                "这是一个测试文档的内容.doc",
                "公司年度财务报告总结.xlsx",
            ],
        );
    }

    #[test]
    fn test_ascii_names_use_configured_default() {
        let entries = raw_entries(WINDOWS_1252, &["readme.txt", "src/main.rs"]);

        let detector = EncodingDetector::new(Arc::new(ChardetClassifier), GBK, 0.5);
        let first = detector.detect(&entries).unwrap();
        let second = detector.detect(&entries).unwrap();

        assert_eq!(first.encoding, GBK);
        assert!(first.fallback);
        assert_eq!(first, second);
        assert_eq!(first.decode_entry(&entries[1]), "src/main.rs");
    }

    #[test]
    fn test_utf8_without_flag() {
        let entries = raw_entries(UTF_8, &["café/crème brûlée.txt"]);
        let guess = EncodingDetector::default().detect(&entries).unwrap();
        assert_eq!(guess.encoding, UTF_8);
        assert_eq!(guess.decode_entry(&entries[0]), "café/crème brûlée.txt");
    }

    #[test]
    fn test_declared_names_need_no_guess() {
        let entries = vec![Entry::file(0, "plain.txt", 1)];
        assert_eq!(EncodingDetector::default().detect(&entries), None);
    }

    struct Fixed(Verdict);

    impl CharsetClassifier for Fixed {
        fn classify(&self, _sample: &[u8]) -> Verdict {
            self.0
        }
    }

    #[test]
    fn test_weak_or_unsupported_verdicts_fall_back() {
        let weak = EncodingDetector::new(
            Arc::new(Fixed(Verdict {
                encoding: SHIFT_JIS,
                confidence: 0.3,
            })),
            WINDOWS_1252,
            0.5,
        );
        assert_eq!(weak.detect_bytes(b"\x83").encoding, WINDOWS_1252);

        let unsupported = EncodingDetector::new(
            Arc::new(Fixed(Verdict {
                encoding: encoding_rs::KOI8_R,
                confidence: 1.0,
            })),
            WINDOWS_1252,
            0.5,
        );
        let guess = unsupported.detect_bytes(b"\xc1");
        assert_eq!(guess.encoding, WINDOWS_1252);
        assert!(guess.fallback);
    }
}
