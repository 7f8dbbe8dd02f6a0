//! Answer-order randomization for quiz questions.
//!
//! Options are permuted by original position, so the correct answer is
//! tracked by identity rather than looked up by value afterwards. That keeps
//! the mapping well defined even when two options share a string, but such
//! questions are still reported through [`has_duplicate_options`] so they
//! can be fixed upstream.

use crate::types::QuizQuestion;

/// Whether two options of `question` have the same text.
pub fn has_duplicate_options(question: &QuizQuestion) -> bool {
    question
        .options
        .iter()
        .enumerate()
        .any(|(i, a)| question.options[i + 1..].iter().any(|b| a == b))
}

/// Return a copy of `question` with its options in uniformly random order and
/// `correct_index` pointing at the same option as before.
///
/// The input is not modified. A question whose `correct_index` is out of
/// range is returned unshuffled.
pub fn randomize(question: &QuizQuestion) -> QuizQuestion {
    if question.correct_option().is_none() {
        tracing::warn!(
            question = %question.prompt,
            correct_index = question.correct_index,
            options = question.options.len(),
            "correct index out of range, leaving option order unchanged"
        );
        return question.clone();
    }
    if has_duplicate_options(question) {
        tracing::warn!(question = %question.prompt, "quiz question has duplicate options");
    }

    let mut order: Vec<usize> = (0..question.options.len()).collect();
    fastrand::shuffle(&mut order);

    let options = order.iter().map(|&i| question.options[i].clone()).collect();
    let correct_index = order
        .iter()
        .position(|&i| i == question.correct_index)
        .unwrap_or(question.correct_index);

    QuizQuestion {
        prompt: question.prompt.clone(),
        options,
        correct_index,
    }
}

/// Randomize every question in a quiz.
pub fn randomize_all(quiz: &[QuizQuestion]) -> Vec<QuizQuestion> {
    quiz.iter().map(randomize).collect()
}
