//! Sentence-granular text model.
//!
//! A document is tokenised by whitespace into words; a sentence ends at
//! any word whose final character is `.`, `!` or `?`. Words after the
//! last terminator form one more editable sentence, and an empty
//! document exposes exactly sentence #1. All rewrites join words with a
//! single space.

/// Characters that close a sentence when they end a word.
pub const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Errors from an in-sentence insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// The sentence index is 0 or beyond the next editable sentence.
    BadSentence,
    /// The word index is 0 or beyond word-count + 1 for the sentence.
    BadPosition,
}

fn is_terminated(word: &str) -> bool {
    word.chars().last().is_some_and(|c| TERMINATORS.contains(&c))
}

/// Splits a document into sentences, each a vector of words. The last
/// sentence may lack a terminator.
pub fn split_sentences(text: &str) -> Vec<Vec<String>> {
    let mut sentences = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        current.push(word.to_owned());
        if is_terminated(word) {
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

/// Number of sentences a writer may address: terminated sentences plus a
/// trailing unterminated one, and never less than one.
pub fn editable_count(text: &str) -> usize {
    split_sentences(text).len().max(1)
}

fn join(sentences: &[Vec<String>]) -> String {
    sentences
        .iter()
        .flat_map(|s| s.iter())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Inserts `content` at 1-based `word_idx` of 1-based `sentence` and
/// returns the rewritten document.
///
/// `word_idx` of N+1 appends to the sentence's end, in front of its
/// terminator; the terminator is peeled off the old last word and
/// reattached to the new one. Terminators inside `content` are kept
/// verbatim; boundaries shift only on the next tokenisation.
pub fn insert(
    text: &str,
    sentence: usize,
    word_idx: usize,
    content: &str,
) -> Result<String, InsertError> {
    let mut sentences = split_sentences(text);
    if sentence == 0 || sentence > sentences.len() + 1 {
        return Err(InsertError::BadSentence);
    }
    if sentence == sentences.len() + 1 {
        sentences.push(Vec::new());
    }
    let target = &mut sentences[sentence - 1];

    let word_count = target.len();
    if word_idx == 0 || word_idx > word_count + 1 {
        return Err(InsertError::BadPosition);
    }

    // Peel the terminator off the sentence's last word so an append at
    // position N+1 lands in front of it.
    let mut terminator = None;
    if let Some(last) = target.last_mut() {
        if is_terminated(last) {
            terminator = last.pop();
            if last.is_empty() {
                target.pop();
            }
        }
    }

    let at = (word_idx - 1).min(target.len());
    let new_words: Vec<String> = content.split_whitespace().map(str::to_owned).collect();
    if new_words.is_empty() {
        return Err(InsertError::BadPosition);
    }
    target.splice(at..at, new_words);

    if let (Some(term), Some(last)) = (terminator, target.last_mut()) {
        last.push(term);
    }

    Ok(join(&sentences))
}

/// Merges a committed swap into the current live document.
///
/// Sentences before and after 1-based `sentence` come from `live`, so
/// concurrent commits to other sentences survive; the target sentence
/// comes from `swap`. A target index beyond the live sentence count
/// appends the swap's sentence after the existing text.
pub fn merge(live: &str, swap: &str, sentence: usize) -> String {
    let swap_sentences = split_sentences(swap);
    let target: Vec<String> =
        swap_sentences.get(sentence.saturating_sub(1)).cloned().unwrap_or_default();

    let mut live_sentences = split_sentences(live);
    if sentence <= live_sentences.len() {
        live_sentences[sentence - 1] = target;
    } else {
        live_sentences.push(target);
    }
    join(&live_sentences)
}

/// Words in a document, as counted for metadata.
pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
