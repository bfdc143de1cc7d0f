//! 句子拆解

use unicode_segmentation::UnicodeSegmentation;

/// 把原文拆成 `[Sentence1]… [Sentence2]…`，句子之间以空格分隔
pub fn split_sentences(text: &str) -> String {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .enumerate()
        .map(|(i, sentence)| format!("[Sentence{}]{}", i + 1, sentence))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_each_sentence() {
        let text = "The economy grew. Did prices rise? Yes!";
        assert_eq!(
            split_sentences(text),
            "[Sentence1]The economy grew. [Sentence2]Did prices rise? [Sentence3]Yes!"
        );
    }

    #[test]
    fn test_blank_text() {
        assert_eq!(split_sentences("   \n"), "");
    }
}
