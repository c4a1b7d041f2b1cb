use tinyrand::RandRange;

use crate::db::models::account::House;
use crate::engine::questions::QuizOption;

/// Running per-house score tally for one quiz session. Pure; the only
/// nondeterminism in classification is the tie-break RNG passed to [`decide`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tally {
    scores: [i64; 4],
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, option: &QuizOption) {
        for (house, weight) in &option.weights {
            self.scores[house.index()] += weight;
        }
    }

    pub fn score(&self, house: House) -> i64 {
        self.scores[house.index()]
    }

    /// Classification: every house sharing the maximum tally is a candidate,
    /// and the tie-break picks uniformly among them so enumeration order
    /// carries no bias.
    pub fn decide<R: RandRange<usize>>(&self, rng: &mut R) -> House {
        let best = *self.scores.iter().max().unwrap_or(&0);
        let tied: Vec<House> = House::ALL
            .into_iter()
            .filter(|h| self.scores[h.index()] == best)
            .collect();

        tied[rng.next_range(0..tied.len())]
    }
}

#[cfg(test)]
mod test {
    use tinyrand::{Seeded, StdRand};

    use super::*;
    use crate::engine::questions::default_questions;

    fn option_for(house: House) -> QuizOption {
        QuizOption {
            letter: 'A',
            text: String::new(),
            weights: vec![(house, 3)],
        }
    }

    #[test]
    fn unique_maximum_is_deterministic() {
        let mut tally = Tally::new();
        tally.apply(&option_for(House::Ravenclaw));
        tally.apply(&option_for(House::Ravenclaw));
        tally.apply(&option_for(House::Gryffindor));

        let mut rng = StdRand::seed(1);
        for _ in 0..50 {
            assert_eq!(tally.decide(&mut rng), House::Ravenclaw);
        }
    }

    #[test]
    fn option_may_credit_multiple_houses() {
        let mut tally = Tally::new();
        tally.apply(&QuizOption {
            letter: 'A',
            text: String::new(),
            weights: vec![(House::Slytherin, 3), (House::Gryffindor, 1)],
        });

        assert_eq!(tally.score(House::Slytherin), 3);
        assert_eq!(tally.score(House::Gryffindor), 1);
        assert_eq!(tally.score(House::Hufflepuff), 0);
    }

    #[test]
    fn two_way_tie_splits_roughly_evenly_with_seeded_rng() {
        let mut tally = Tally::new();
        tally.apply(&option_for(House::Gryffindor));
        tally.apply(&option_for(House::Slytherin));

        let mut rng = StdRand::seed(42);
        let mut gryffindor = 0;
        let mut slytherin = 0;

        for _ in 0..1000 {
            match tally.decide(&mut rng) {
                House::Gryffindor => gryffindor += 1,
                House::Slytherin => slytherin += 1,
                other => panic!("untied house chosen: {other}"),
            }
        }

        assert_eq!(gryffindor + slytherin, 1000);
        assert!((400..=600).contains(&gryffindor), "skewed split: {gryffindor}");
    }

    #[test]
    fn unanimous_answers_through_default_table() {
        // always picking the option that maximizes house B must classify B
        let questions = default_questions();
        let mut tally = Tally::new();

        for question in &questions {
            tally.apply(question.option('B').unwrap());
        }

        let mut rng = StdRand::seed(7);
        assert_eq!(tally.decide(&mut rng), House::Hufflepuff);
    }

    #[test]
    fn empty_tally_still_classifies() {
        let tally = Tally::new();
        let mut rng = StdRand::seed(3);
        // all four tie at zero; any house is acceptable, it must not panic
        let _ = tally.decide(&mut rng);
    }
}
