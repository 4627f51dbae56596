use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sha2::{Digest, Sha256};

use crate::db::models::{QuestionSnapshot, SectionDefinition};

/// Frozen orders for a new attempt.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AttemptOrdering {
    /// Question ids grouped by section, in presentation order.
    pub(crate) sections: Vec<Vec<String>>,
    pub(crate) option_orders: HashMap<String, Vec<String>>,
}

impl AttemptOrdering {
    pub(crate) fn question_order(&self) -> Vec<String> {
        self.sections.iter().flatten().cloned().collect()
    }
}

/// Seed derived from the attempt identity, stable across processes.
pub(crate) fn attempt_seed(test_id: &str, student_id: &str, attempt_number: i32) -> u64 {
    derive_seed(format!("{test_id}:{student_id}:{attempt_number}").as_bytes())
}

fn derive_seed(material: &[u8]) -> u64 {
    let digest = Sha256::digest(material);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Shuffles questions within each section (sections stay contiguous) and
/// records option orders for every multiple-choice question.
pub(crate) fn build_ordering(
    seed: u64,
    sections: &[SectionDefinition],
    questions: &HashMap<String, QuestionSnapshot>,
    randomize_questions: bool,
    randomize_options: bool,
) -> AttemptOrdering {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ordered_sections = Vec::with_capacity(sections.len());

    for section in sections {
        let mut ids = section.question_ids.clone();
        if randomize_questions {
            ids.shuffle(&mut rng);
        }
        ordered_sections.push(ids);
    }

    let mut option_orders = HashMap::new();
    for id in ordered_sections.iter().flatten() {
        let Some(question) = questions.get(id) else {
            continue;
        };
        if !question.question_type.has_options() {
            continue;
        }

        let mut labels: Vec<String> =
            question.options.iter().map(|option| option.label.clone()).collect();
        if randomize_options {
            let mut option_rng =
                StdRng::seed_from_u64(derive_seed(format!("{seed}:{id}").as_bytes()));
            labels.shuffle(&mut option_rng);
        }
        option_orders.insert(id.clone(), labels);
    }

    AttemptOrdering { sections: ordered_sections, option_orders }
}
