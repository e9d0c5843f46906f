/// Thresholds deciding when a page's native text layer is too thin to
/// search and OCR should be offered instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    /// Minimum non-whitespace characters for a page to count as having text.
    pub min_text_chars: usize,
    /// Minimum alphanumeric words for a page to count as having text.
    pub min_word_count: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { min_text_chars: 50, min_word_count: 10 }
    }
}

impl SearchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_text_chars(mut self, chars: usize) -> Self {
        self.min_text_chars = chars;
        self
    }

    pub fn with_min_word_count(mut self, words: usize) -> Self {
        self.min_word_count = words;
        self
    }

    /// Whether extracted text is too sparse to be the page's real content.
    ///
    /// Empty pages, pages under the character threshold, and pages with too
    /// few real words (sequences containing an alphanumeric character) all
    /// report true. Scanned pages typically carry nothing but a sheet number,
    /// which is exactly what the word check filters out.
    pub fn needs_ocr(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return true;
        }

        let char_count = text.chars().filter(|c| !c.is_whitespace()).count();
        if char_count < self.min_text_chars {
            return true;
        }

        let word_count = text
            .split_whitespace()
            .filter(|word| word.chars().any(|c| c.is_alphanumeric()))
            .count();

        word_count < self.min_word_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_pages_need_ocr() {
        let config = SearchConfig::default();

        assert!(config.needs_ocr(""));
        assert!(config.needs_ocr("   "));
        assert!(config.needs_ocr("\n\t  \n"));
    }

    #[test]
    fn short_text_needs_ocr() {
        let config = SearchConfig::default();

        assert!(config.needs_ocr("Page 3 of 12"));
        assert!(config.needs_ocr(&"x".repeat(49)));
    }

    #[test]
    fn few_words_need_ocr_even_with_enough_characters() {
        let config = SearchConfig::default();

        // 50+ characters but a single word.
        assert!(config.needs_ocr(&"a".repeat(60)));

        // Nine words falls one short of the default threshold.
        assert!(config.needs_ocr(
            "incontrovertibly one two three four five six seven eight"
        ));
    }

    #[test]
    fn symbols_do_not_count_as_words() {
        let config = SearchConfig::default();
        assert!(config.needs_ocr("!!! ### $$$ %%% ^^^ &&& *** ((( ))) ___"));
    }

    #[test]
    fn sufficient_text_skips_ocr() {
        let config = SearchConfig::default();

        let body = "Quarterly statement covering invoices issued between January and \
                    March, with payment terms and account references listed below.";
        assert!(!config.needs_ocr(body));
        assert!(!config.needs_ocr(&"word ".repeat(100)));
    }

    #[test]
    fn thresholds_are_configurable() {
        let lenient = SearchConfig::new().with_min_text_chars(3).with_min_word_count(1);

        assert!(!lenient.needs_ocr("abc"));
        assert!(lenient.needs_ocr("ab"));
    }
}
