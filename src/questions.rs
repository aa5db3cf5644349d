use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::QuestionStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub category: String,
    pub text: String,
    pub answer: String,
    pub options: Vec<String>,
    pub duration: u64,
}

impl Question {
    /// A playable question has text, exactly four options and the correct
    /// answer among them.
    pub fn is_playable(&self) -> bool {
        !self.text.is_empty()
            && self.duration > 0
            && self.options.len() == 4
            && self.options.iter().any(|o| o == &self.answer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Category {
    pub id: &'static str,
    pub name: &'static str,
}

pub const CATEGORIES: &[Category] = &[
    Category { id: "matematica", name: "Matemática" },
    Category { id: "historia", name: "Historia" },
    Category { id: "geografia", name: "Geografía" },
    Category { id: "ciencias", name: "Ciencias" },
    Category { id: "literatura", name: "Literatura" },
    Category { id: "fisica", name: "Física" },
    Category { id: "quimica", name: "Química" },
    Category { id: "biologia", name: "Biología" },
];

pub fn is_known_category(id: &str) -> bool {
    CATEGORIES.iter().any(|c| c.id == id)
}

/// Picks the questions for one duel. The store is sampled first; the
/// built-in bank tops the selection up when the store comes back short or
/// not at all.
#[derive(Clone)]
pub struct QuestionProvider {
    store: Arc<dyn QuestionStore>,
    per_duel: usize,
}

impl QuestionProvider {
    pub fn new(store: Arc<dyn QuestionStore>, per_duel: usize) -> Self {
        Self { store, per_duel }
    }

    pub async fn questions_for_duel(&self, category: &str) -> Vec<Question> {
        let mut questions = match self.store.sample(category, self.per_duel).await {
            Ok(stored) => {
                let (playable, broken): (Vec<_>, Vec<_>) =
                    stored.into_iter().partition(Question::is_playable);
                if !broken.is_empty() {
                    warn!(
                        category,
                        dropped = broken.len(),
                        "Dropped unplayable questions from the store sample"
                    );
                }
                playable
            }
            Err(e) => {
                warn!(category, "Question store lookup failed, serving the built-in bank: {e:#}");
                Vec::new()
            }
        };

        if questions.len() < self.per_duel {
            for question in builtin_bank(category) {
                if questions.len() >= self.per_duel {
                    break;
                }
                if questions.iter().all(|q| q.id != question.id) {
                    questions.push(question);
                }
            }
        }

        questions.truncate(self.per_duel);
        questions.shuffle(&mut rand::thread_rng());
        questions
    }
}

fn question(id: &str, category: &str, text: &str, answer: &str, options: [&str; 4], duration: u64) -> Question {
    Question {
        id: id.to_string(),
        category: category.to_string(),
        text: text.to_string(),
        answer: answer.to_string(),
        options: options.iter().map(|o| o.to_string()).collect(),
        duration,
    }
}

/// The shipped fallback bank, partitioned by the same category ids as the
/// store. Order within a category is fixed so that top-up is deterministic.
pub fn builtin_bank(category: &str) -> Vec<Question> {
    match category {
        "matematica" => vec![
            question("builtin-matematica-1", "matematica", "¿Cuánto es 2 + 2?", "4", ["3", "4", "5", "6"], 30),
            question("builtin-matematica-2", "matematica", "¿Cuánto es 7 × 8?", "56", ["54", "56", "58", "64"], 20),
            question("builtin-matematica-3", "matematica", "¿Cuál es la raíz cuadrada de 144?", "12", ["10", "11", "12", "14"], 20),
        ],
        "historia" => vec![
            question("builtin-historia-1", "historia", "¿En qué año llegó Cristóbal Colón a América?", "1492", ["1492", "1592", "1392", "1500"], 30),
            question("builtin-historia-2", "historia", "¿En qué año terminó la Segunda Guerra Mundial?", "1945", ["1918", "1939", "1945", "1950"], 20),
            question("builtin-historia-3", "historia", "¿Quién lideró la independencia de gran parte de Sudamérica?", "Simón Bolívar", ["José de San Martín", "Simón Bolívar", "Bernardo O'Higgins", "Antonio José de Sucre"], 25),
        ],
        "geografia" => vec![
            question("builtin-geografia-1", "geografia", "¿Cuál es el río más largo del mundo?", "Nilo", ["Amazonas", "Nilo", "Misisipi", "Yangtsé"], 30),
            question("builtin-geografia-2", "geografia", "¿Cuál es la capital de Francia?", "Paris", ["Paris", "Londres", "Roma", "Madrid"], 10),
            question("builtin-geografia-3", "geografia", "¿Cuál es el país más extenso del mundo?", "Rusia", ["Canadá", "China", "Rusia", "Brasil"], 20),
        ],
        "ciencias" => vec![
            question("builtin-ciencias-1", "ciencias", "¿Cuál es el elemento químico con símbolo 'O'?", "Oxígeno", ["Oro", "Osmio", "Oxígeno", "Boro"], 30),
            question("builtin-ciencias-2", "ciencias", "¿Cuántos planetas tiene el sistema solar?", "8", ["7", "8", "9", "10"], 15),
            question("builtin-ciencias-3", "ciencias", "¿Qué gas absorben las plantas de la atmósfera?", "Dióxido de carbono", ["Oxígeno", "Nitrógeno", "Dióxido de carbono", "Hidrógeno"], 20),
        ],
        "literatura" => vec![
            question("builtin-literatura-1", "literatura", "¿Quién escribió 'Cien años de soledad'?", "Gabriel García Márquez", ["Mario Vargas Llosa", "Gabriel García Márquez", "Julio Cortázar", "Pablo Neruda"], 30),
            question("builtin-literatura-2", "literatura", "¿Quién escribió 'Don Quijote de la Mancha'?", "Miguel de Cervantes", ["Lope de Vega", "Francisco de Quevedo", "Miguel de Cervantes", "Garcilaso de la Vega"], 20),
            question("builtin-literatura-3", "literatura", "¿Quién escribió 'La Odisea'?", "Homero", ["Homero", "Virgilio", "Sófocles", "Platón"], 20),
        ],
        "fisica" => vec![
            question("builtin-fisica-1", "fisica", "¿Cuál es la unidad de fuerza en el Sistema Internacional?", "Newton", ["Joule", "Newton", "Pascal", "Watt"], 20),
            question("builtin-fisica-2", "fisica", "¿Quién formuló la ley de la gravitación universal?", "Isaac Newton", ["Galileo Galilei", "Isaac Newton", "Albert Einstein", "Johannes Kepler"], 25),
            question("builtin-fisica-3", "fisica", "¿Cuál es la velocidad aproximada de la luz en el vacío?", "300000 km/s", ["150000 km/s", "300000 km/s", "300000 m/s", "30000 km/s"], 25),
        ],
        "quimica" => vec![
            question("builtin-quimica-1", "quimica", "¿Cuál es la fórmula química del agua?", "H2O", ["H2O", "CO2", "O2", "NaCl"], 15),
            question("builtin-quimica-2", "quimica", "¿Qué elemento tiene el símbolo 'Fe'?", "Hierro", ["Flúor", "Fósforo", "Hierro", "Helio"], 20),
            question("builtin-quimica-3", "quimica", "¿Cuál es el pH de una solución neutra?", "7", ["0", "5", "7", "14"], 20),
        ],
        "biologia" => vec![
            question("builtin-biologia-1", "biologia", "¿Cuál es la unidad básica de la vida?", "La célula", ["El átomo", "La célula", "La molécula", "El tejido"], 20),
            question("builtin-biologia-2", "biologia", "¿Qué órgano bombea la sangre en el cuerpo humano?", "El corazón", ["El hígado", "El pulmón", "El corazón", "El riñón"], 15),
            question("builtin-biologia-3", "biologia", "¿En qué orgánulo ocurre la fotosíntesis?", "En los cloroplastos", ["En las mitocondrias", "En los cloroplastos", "En el núcleo", "En los ribosomas"], 25),
        ],
        _ => Vec::new(),
    }
}
