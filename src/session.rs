use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::QuizError;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct QuizQuestion {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct: usize,

    #[serde(default)]
    pub explanation: String,
}

impl QuizQuestion {
    pub fn validate(&self) -> Result<(), QuizError> {
        if self.correct < self.options.len() {
            Ok(())
        } else {
            Err(QuizError::MalformedQuestion {
                id: self.id.clone(),
                correct: self.correct,
            })
        }
    }
}

/// The cursor part of a quiz session, everything except the questions.
///
/// This is what gets stored in a user's token between requests.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SessionState {
    pub current_index: usize,
    pub selected: Option<usize>,
    pub revealed: bool,
    pub score: usize,
    pub completed: bool,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Answering,
    AnswerSelected,
    Revealed,
    Completed,
}

/// Whether an operation changed the session or was dropped because the
/// session was in a phase that doesn't allow it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Ignored,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptionMark {
    Neutral,
    Selected,
    Correct,
    Incorrect,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct Progress {
    pub index: usize,
    pub total: usize,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct ScoreSummary {
    pub score: usize,
    pub total: usize,
    pub percentage: u32,
}

impl ScoreSummary {
    pub fn new(score: usize, total: usize) -> ScoreSummary {
        ScoreSummary {
            score,
            total,
            percentage: percentage(score, total),
        }
    }

    pub fn outcome(&self, policy: &PassPolicy) -> Outcome {
        policy.outcome(self.percentage)
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    NeedsImprovement,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PassPolicy {
    pub pass_threshold: u32,
}

impl Default for PassPolicy {
    fn default() -> PassPolicy {
        PassPolicy { pass_threshold: 70 }
    }
}

impl PassPolicy {
    pub fn outcome(&self, percentage: u32) -> Outcome {
        if percentage >= self.pass_threshold {
            Outcome::Passed
        } else {
            Outcome::NeedsImprovement
        }
    }
}

/// Whole-number percentage of `score` out of `total`, rounding halves up.
pub fn percentage(score: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }

    ((score * 200 + total) / (total * 2)) as u32
}

/// One user's pass through the questions of a quiz.
///
/// Questions are answered strictly in order: select a candidate, confirm it
/// to reveal the result, then advance. Operations that arrive in the wrong
/// phase (a second confirm, a selection after the reveal) are ignored so
/// duplicated UI events never touch the score.
#[derive(Clone, Debug)]
pub struct QuizSession {
    questions: Arc<[QuizQuestion]>,
    state: SessionState,
}

impl QuizSession {
    pub fn start(questions: impl Into<Arc<[QuizQuestion]>>) -> Result<QuizSession, QuizError> {
        let questions = questions.into();

        if questions.is_empty() {
            return Err(QuizError::NoQuestionsAvailable);
        }

        for question in questions.iter() {
            question.validate()?;
        }

        Ok(QuizSession {
            questions,
            state: SessionState::default(),
        })
    }

    /// Rebuilds a session from a previously saved state.
    ///
    /// Fails with `StaleSession` when the state could not have been produced
    /// by a session over these questions, e.g. after the quiz was edited.
    pub fn resume(
        questions: impl Into<Arc<[QuizQuestion]>>,
        state: SessionState,
    ) -> Result<QuizSession, QuizError> {
        let mut session = QuizSession::start(questions)?;
        let total = session.questions.len();

        let fits = match session.questions.get(state.current_index) {
            None => false,
            Some(question) => {
                let answered = state.current_index + if state.revealed { 1 } else { 0 };

                state.score <= answered
                    && state.selected.map_or(true, |index| index < question.options.len())
                    && (!state.revealed || state.selected.is_some())
                    && (!state.completed || (state.revealed && answered == total))
            }
        };

        if !fits {
            return Err(QuizError::StaleSession);
        }

        session.state = state;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state.completed
    }

    pub fn phase(&self) -> Phase {
        if self.state.completed {
            Phase::Completed
        } else if self.state.revealed {
            Phase::Revealed
        } else if self.state.selected.is_some() {
            Phase::AnswerSelected
        } else {
            Phase::Answering
        }
    }

    pub fn current_question(&self) -> &QuizQuestion {
        &self.questions[self.state.current_index]
    }

    pub fn progress(&self) -> Progress {
        Progress {
            index: self.state.current_index,
            total: self.questions.len(),
        }
    }

    pub fn score_summary(&self) -> ScoreSummary {
        ScoreSummary::new(self.state.score, self.questions.len())
    }

    /// Result of the current question, once it has been revealed.
    pub fn answered_correctly(&self) -> Option<bool> {
        if !self.state.revealed {
            return None;
        }

        self.state
            .selected
            .map(|selected| selected == self.current_question().correct)
    }

    pub fn option_marks(&self) -> Vec<OptionMark> {
        let question = self.current_question();

        (0..question.options.len())
            .map(|index| {
                let is_selected = self.state.selected == Some(index);

                if !self.state.revealed {
                    if is_selected {
                        OptionMark::Selected
                    } else {
                        OptionMark::Neutral
                    }
                } else if index == question.correct {
                    OptionMark::Correct
                } else if is_selected {
                    OptionMark::Incorrect
                } else {
                    OptionMark::Neutral
                }
            })
            .collect()
    }

    pub fn select_answer(&mut self, index: usize) -> Result<Transition, QuizError> {
        if self.state.revealed || self.state.completed {
            debug!(index, phase = ?self.phase(), "ignoring answer selection");
            return Ok(Transition::Ignored);
        }

        let options = self.current_question().options.len();
        if index >= options {
            return Err(QuizError::InvalidInput { index, options });
        }

        self.state.selected = Some(index);
        Ok(Transition::Applied)
    }

    pub fn confirm_answer(&mut self) -> Transition {
        if self.state.revealed || self.state.completed {
            debug!(phase = ?self.phase(), "ignoring confirm, already revealed");
            return Transition::Ignored;
        }

        let selected = match self.state.selected {
            Some(selected) => selected,
            None => {
                debug!("ignoring confirm, no answer selected");
                return Transition::Ignored;
            }
        };

        if selected == self.current_question().correct {
            self.state.score += 1;
        }
        self.state.revealed = true;

        Transition::Applied
    }

    pub fn advance(&mut self) -> Transition {
        if !self.state.revealed || self.state.completed {
            debug!(phase = ?self.phase(), "ignoring advance");
            return Transition::Ignored;
        }

        if self.state.current_index + 1 >= self.questions.len() {
            self.state.completed = true;
        } else {
            self.state.current_index += 1;
            self.state.selected = None;
            self.state.revealed = false;
        }

        Transition::Applied
    }

    pub fn restart(&mut self) {
        self.state = SessionState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn question(id: &str, options: usize, correct: usize) -> QuizQuestion {
        QuizQuestion {
            id: id.into(),
            prompt: format!("prompt {}", id),
            options: (0..options).map(|i| format!("option {}", i)).collect(),
            correct,
            explanation: format!("explanation {}", id),
        }
    }

    fn three_questions() -> Vec<QuizQuestion> {
        vec![question("a", 3, 1), question("b", 3, 0), question("c", 3, 2)]
    }

    fn answer(session: &mut QuizSession, index: usize) {
        assert_eq!(session.select_answer(index), Ok(Transition::Applied));
        assert_eq!(session.confirm_answer(), Transition::Applied);
        assert_eq!(session.advance(), Transition::Applied);
    }

    #[test]
    fn empty_quiz_is_rejected() {
        let result = QuizSession::start(Vec::<QuizQuestion>::new());
        assert_matches!(result, Err(QuizError::NoQuestionsAvailable));
    }

    #[test]
    fn malformed_question_is_rejected() {
        let result = QuizSession::start(vec![question("a", 2, 2)]);
        assert_matches!(result, Err(QuizError::MalformedQuestion { correct: 2, .. }));
    }

    #[test]
    fn starts_answering_first_question() {
        let session = QuizSession::start(three_questions()).unwrap();

        assert_eq!(session.phase(), Phase::Answering);
        assert_eq!(session.progress(), Progress { index: 0, total: 3 });
        assert_eq!(session.score_summary(), ScoreSummary::new(0, 3));
        assert_eq!(session.current_question().id, "a");
    }

    #[test]
    fn full_run_scores_two_of_three() {
        let mut session = QuizSession::start(three_questions()).unwrap();

        answer(&mut session, 1);
        answer(&mut session, 1);
        answer(&mut session, 2);

        assert!(session.is_completed());
        assert_eq!(session.phase(), Phase::Completed);

        let summary = session.score_summary();
        assert_eq!(summary.score, 2);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.percentage, 67);
        assert_eq!(summary.outcome(&PassPolicy::default()), Outcome::NeedsImprovement);
    }

    #[test]
    fn out_of_range_selection_leaves_state_unchanged() {
        let mut session = QuizSession::start(three_questions()).unwrap();
        session.select_answer(2).unwrap();
        let before = session.state();

        let result = session.select_answer(5);

        assert_eq!(result, Err(QuizError::InvalidInput { index: 5, options: 3 }));
        assert_eq!(session.state(), before);
    }

    #[test]
    fn selecting_again_overwrites_candidate() {
        let mut session = QuizSession::start(three_questions()).unwrap();

        session.select_answer(0).unwrap();
        session.select_answer(1).unwrap();

        assert_eq!(session.phase(), Phase::AnswerSelected);
        assert_eq!(session.state().selected, Some(1));
        assert_eq!(session.state().score, 0);
    }

    #[test]
    fn confirm_without_selection_is_ignored() {
        let mut session = QuizSession::start(three_questions()).unwrap();

        assert_eq!(session.confirm_answer(), Transition::Ignored);
        assert_eq!(session.phase(), Phase::Answering);
    }

    #[test]
    fn double_confirm_scores_once() {
        let mut session = QuizSession::start(three_questions()).unwrap();
        session.select_answer(1).unwrap();

        assert_eq!(session.confirm_answer(), Transition::Applied);
        assert_eq!(session.confirm_answer(), Transition::Ignored);
        assert_eq!(session.state().score, 1);
        assert_eq!(session.answered_correctly(), Some(true));
    }

    #[test]
    fn selection_is_locked_after_reveal() {
        let mut session = QuizSession::start(three_questions()).unwrap();
        session.select_answer(0).unwrap();
        session.confirm_answer();

        assert_eq!(session.select_answer(1), Ok(Transition::Ignored));
        assert_eq!(session.state().selected, Some(0));
        assert_eq!(session.answered_correctly(), Some(false));
    }

    #[test]
    fn advance_requires_reveal() {
        let mut session = QuizSession::start(three_questions()).unwrap();
        assert_eq!(session.advance(), Transition::Ignored);

        session.select_answer(0).unwrap();
        assert_eq!(session.advance(), Transition::Ignored);
        assert_eq!(session.progress().index, 0);
    }

    #[test]
    fn advance_moves_exactly_one_question() {
        let mut session = QuizSession::start(three_questions()).unwrap();

        for expected in 1..3 {
            session.select_answer(0).unwrap();
            session.confirm_answer();
            session.advance();

            assert_eq!(session.progress().index, expected);
            assert_eq!(session.phase(), Phase::Answering);
            assert_eq!(session.state().selected, None);
        }

        session.select_answer(0).unwrap();
        session.confirm_answer();
        session.advance();
        assert_eq!(session.progress().index, 2);
        assert!(session.is_completed());
    }

    #[test]
    fn completed_session_only_restarts() {
        let mut session = QuizSession::start(vec![question("a", 2, 0)]).unwrap();
        answer(&mut session, 0);

        assert_eq!(session.select_answer(1), Ok(Transition::Ignored));
        assert_eq!(session.confirm_answer(), Transition::Ignored);
        assert_eq!(session.advance(), Transition::Ignored);
        assert_eq!(session.state().score, 1);
    }

    #[test]
    fn restart_resets_everything() {
        let mut session = QuizSession::start(three_questions()).unwrap();
        answer(&mut session, 1);
        answer(&mut session, 0);
        session.select_answer(2).unwrap();
        session.confirm_answer();

        session.restart();

        assert_eq!(session.state(), SessionState::default());
        assert_eq!(session.phase(), Phase::Answering);
        assert_eq!(session.progress().total, 3);

        answer(&mut session, 1);
        answer(&mut session, 0);
        answer(&mut session, 2);
        session.restart();
        assert!(!session.is_completed());
        assert_eq!(session.state().score, 0);
    }

    #[test]
    fn score_stays_in_bounds_for_every_answer_pattern() {
        for pattern in 0..27 {
            let mut session = QuizSession::start(three_questions()).unwrap();
            let answers = [pattern % 3, (pattern / 3) % 3, pattern / 9];

            for &index in answers.iter() {
                session.select_answer(index).unwrap();
                session.confirm_answer();
                session.confirm_answer();
                assert!(session.state().score <= session.progress().total);
                session.advance();
                assert!(session.state().score <= session.progress().total);
            }

            let expected = answers
                .iter()
                .zip([1usize, 0, 2].iter())
                .filter(|(answer, correct)| answer == correct)
                .count();
            assert_eq!(session.state().score, expected);
            assert!(session.is_completed());
        }
    }

    #[test]
    fn marks_before_and_after_reveal() {
        let mut session = QuizSession::start(three_questions()).unwrap();
        assert_eq!(session.option_marks(), vec![OptionMark::Neutral; 3]);

        session.select_answer(2).unwrap();
        assert_eq!(
            session.option_marks(),
            vec![OptionMark::Neutral, OptionMark::Neutral, OptionMark::Selected]
        );

        session.confirm_answer();
        assert_eq!(
            session.option_marks(),
            vec![OptionMark::Neutral, OptionMark::Correct, OptionMark::Incorrect]
        );
    }

    #[test]
    fn correct_answer_is_only_mark_when_right() {
        let mut session = QuizSession::start(three_questions()).unwrap();
        session.select_answer(1).unwrap();
        session.confirm_answer();

        assert_eq!(
            session.option_marks(),
            vec![OptionMark::Neutral, OptionMark::Correct, OptionMark::Neutral]
        );
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(7, 10), 70);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(0, 4), 0);
        assert_eq!(percentage(4, 4), 100);
        assert_eq!(percentage(0, 0), 0);
    }

    #[test]
    fn pass_threshold_is_inclusive_and_configurable() {
        let summary = ScoreSummary::new(7, 10);
        assert_eq!(summary.outcome(&PassPolicy::default()), Outcome::Passed);

        let strict = PassPolicy { pass_threshold: 80 };
        assert_eq!(summary.outcome(&strict), Outcome::NeedsImprovement);
    }

    #[test]
    fn resume_restores_saved_state() {
        let mut session = QuizSession::start(three_questions()).unwrap();
        answer(&mut session, 1);
        session.select_answer(0).unwrap();
        session.confirm_answer();

        let resumed = QuizSession::resume(three_questions(), session.state()).unwrap();

        assert_eq!(resumed.state(), session.state());
        assert_eq!(resumed.phase(), Phase::Revealed);
    }

    #[test]
    fn resume_rejects_state_that_does_not_fit() {
        let out_of_range = SessionState {
            current_index: 3,
            ..SessionState::default()
        };
        assert_matches!(
            QuizSession::resume(three_questions(), out_of_range),
            Err(QuizError::StaleSession)
        );

        let inflated_score = SessionState {
            current_index: 1,
            score: 2,
            ..SessionState::default()
        };
        assert_matches!(
            QuizSession::resume(three_questions(), inflated_score),
            Err(QuizError::StaleSession)
        );

        let revealed_without_answer = SessionState {
            revealed: true,
            ..SessionState::default()
        };
        assert_matches!(
            QuizSession::resume(three_questions(), revealed_without_answer),
            Err(QuizError::StaleSession)
        );
    }
}
