//! Turning questions into chat-ready prompts

use billbot_backend::{AnswerType, QuestionDefinition};

use crate::session::ConversationSession;
use crate::texts;
use crate::transport::Control;

/// Token of the "skip" control
pub const SKIP_TOKEN: &str = "skip";
/// Token of the confirmation "yes" control
pub const CONFIRM_TOKEN: &str = "yes";
/// Token of the confirmation "no" control
pub const CANCEL_TOKEN: &str = "no";

/// Question whose options are labelled with their tax number
const LEGAL_ENTITIES_QUESTION: &str = "legals";

/// Text plus controls, ready to send or edit in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub text: String,
    pub controls: Vec<Control>,
}

fn skip_control() -> Control {
    Control::new(texts::SKIP, SKIP_TOKEN)
}

/// Render a question. Pure; the same question always renders the same way.
pub fn render_question(question: &QuestionDefinition) -> RenderedPrompt {
    let mut controls = Vec::new();

    match question.answer_type {
        AnswerType::Select => {
            for option in &question.options {
                let name = option.field("name").unwrap_or_default();
                let label = if question.name == LEGAL_ENTITIES_QUESTION {
                    texts::legal_entity(&name, &option.field("inn").unwrap_or_default())
                } else {
                    name
                };
                controls.push(Control::new(label, option.token()));
            }
            if !question.required {
                controls.push(skip_control());
            }
        }
        AnswerType::Numeric | AnswerType::Text => {
            if !question.required {
                controls.push(skip_control());
            }
        }
    }

    RenderedPrompt {
        text: question.prompt.clone(),
        controls,
    }
}

/// Render the accumulated answers with yes/no controls
pub fn render_confirmation(session: &ConversationSession) -> RenderedPrompt {
    RenderedPrompt {
        text: session.summary(texts::CONFIRM_HEADER),
        controls: vec![
            Control::new(texts::YES, CONFIRM_TOKEN),
            Control::new(texts::NO, CANCEL_TOKEN),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{numeric_question, option, select_question, text_question};
    use billbot_backend::AnswerValue;

    fn tokens(prompt: &RenderedPrompt) -> Vec<&str> {
        prompt.controls.iter().map(|c| c.token.as_str()).collect()
    }

    #[test]
    fn test_required_select_has_no_skip() {
        let prompt = render_question(&select_question("sellers", true));
        assert_eq!(tokens(&prompt), vec!["1", "2"]);
        assert_eq!(prompt.controls[0].label, "A");
        assert_eq!(prompt.controls[1].label, "B");
        assert_eq!(prompt.text, "Pick sellers");
    }

    #[test]
    fn test_optional_select_ends_with_skip() {
        let prompt = render_question(&select_question("sellers", false));
        assert_eq!(tokens(&prompt), vec!["1", "2", SKIP_TOKEN]);
        assert_eq!(prompt.controls[2].label, texts::SKIP);
    }

    #[test]
    fn test_legal_entities_show_inn() {
        let mut question = select_question("legals", true);
        question.options = vec![option(4, &[("name", "Horns"), ("inn", "7701")])];
        let prompt = render_question(&question);
        assert_eq!(prompt.controls[0].label, "Horns, ИНН: 7701");
        assert_eq!(prompt.controls[0].token, "4");
    }

    #[test]
    fn test_typed_questions() {
        assert!(render_question(&numeric_question("amount", true, false)).controls.is_empty());
        assert_eq!(
            tokens(&render_question(&numeric_question("amount", false, false))),
            vec![SKIP_TOKEN]
        );
        assert!(render_question(&text_question("comment", true, false)).controls.is_empty());
        assert_eq!(
            tokens(&render_question(&text_question("comment", false, false))),
            vec![SKIP_TOKEN]
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        let question = select_question("sellers", false);
        assert_eq!(render_question(&question), render_question(&question));
    }

    #[test]
    fn test_confirmation_prompt() {
        let mut session = ConversationSession::new(-1, 1);
        session.present_question(text_question("comment", true, true));
        session
            .record_answer(AnswerValue::Text("urgent".into()), "urgent")
            .unwrap();
        let prompt = render_confirmation(&session);
        assert_eq!(prompt.text, "Эти данные верны?\nDisplay comment: urgent");
        assert_eq!(tokens(&prompt), vec![CONFIRM_TOKEN, CANCEL_TOKEN]);
    }
}
