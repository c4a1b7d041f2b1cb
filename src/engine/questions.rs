use serde::{Deserialize, Serialize};

use crate::db::models::account::House;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub options: Vec<QuizOption>,
}

/// One lettered answer. An option may weight more than one house (partial
/// credit toward a secondary trait).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizOption {
    pub letter: char,
    pub text: String,
    pub weights: Vec<(House, i64)>,
}

impl Question {
    pub fn option(&self, letter: char) -> Option<&QuizOption> {
        self.options.iter().find(|o| o.letter == letter)
    }

    /// The lettered option block as presented to the subject.
    pub fn render_options(&self) -> String {
        self.options
            .iter()
            .map(|o| format!("**{}** — {}", o.letter, o.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Normalizes a raw reply to an option letter: trimmed, case-insensitive,
/// single character. Anything else is an invalid answer.
pub fn normalize_answer(raw: &str) -> Option<char> {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();

    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c.to_ascii_uppercase()),
        _ => None,
    }
}

pub fn from_json(raw: &str) -> serde_json::Result<Vec<Question>> {
    serde_json::from_str(raw)
}

/// The shipped question table.
pub fn default_questions() -> Vec<Question> {
    use House::*;

    fn q(text: &str, options: [(&str, &[(House, i64)]); 4]) -> Question {
        Question {
            text: text.to_string(),
            options: options
                .into_iter()
                .zip(['A', 'B', 'C', 'D'])
                .map(|((text, weights), letter)| QuizOption {
                    letter,
                    text: text.to_string(),
                    weights: weights.to_vec(),
                })
                .collect(),
        }
    }

    vec![
        q(
            "You see someone being bullied. What do you do?",
            [
                ("Step in immediately, even if it's risky.", &[(Gryffindor, 3), (Hufflepuff, 1)]),
                ("Get help / rally people to stop it safely.", &[(Hufflepuff, 3), (Ravenclaw, 1)]),
                ("Assess the situation and plan the most effective move.", &[(Ravenclaw, 3), (Slytherin, 1)]),
                ("Use influence/pressure to make it stop, fast.", &[(Slytherin, 3), (Gryffindor, 1)]),
            ],
        ),
        q(
            "What do you value most?",
            [
                ("Bravery", &[(Gryffindor, 3)]),
                ("Loyalty", &[(Hufflepuff, 3)]),
                ("Knowledge", &[(Ravenclaw, 3)]),
                ("Ambition", &[(Slytherin, 3)]),
            ],
        ),
        q(
            "Pick a class you'd never skip:",
            [
                ("Defense Against the Dark Arts", &[(Gryffindor, 2), (Slytherin, 1)]),
                ("Herbology", &[(Hufflepuff, 3)]),
                ("Charms", &[(Ravenclaw, 3)]),
                ("Potions", &[(Slytherin, 3)]),
            ],
        ),
        q(
            "Your ideal weekend is:",
            [
                ("Adventure / exploring somewhere new", &[(Gryffindor, 2), (Ravenclaw, 1)]),
                ("Cozy time with friends/family", &[(Hufflepuff, 3)]),
                ("Learning something or a creative project", &[(Ravenclaw, 3)]),
                ("Working on goals / leveling up", &[(Slytherin, 3)]),
            ],
        ),
    ]
}
