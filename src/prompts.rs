//! Prompt templates for each supported language.
//!
//! Templates carry named `{slot}` placeholders. The body template takes
//! `exchanges_per_call`, `instruction` and `conversation_history`; the
//! closing template takes `final_exchange_number` and `conversation_history`.

use regex::{Captures, Regex};
use std::sync::OnceLock;

use crate::config::Language;

/// Language-specific prompt text
#[derive(Debug)]
pub struct PromptTemplates {
    /// Body template used for every chunk request
    pub body: &'static str,
    /// Closing template used for the final exchange
    pub closing: &'static str,
    /// Instruction for the first chunk
    pub start_instruction: &'static str,
    /// Instruction for later chunks, with a `{next_exchange}` slot
    pub continue_instruction: &'static str,
    /// Heading placed above the conversation history
    pub history_heading: &'static str,
}

const EN_BODY: &str = r##"
You are a clinical dialogue simulator. Your task is to generate a realistic, detailed, and lengthy conversation between a hematologist and a patient with Leukemia.

CONTEXT:
- Disease: Leukemia. The patient is undergoing treatment or is in a follow-up phase.
- Dialogue Goal: The conversation must explore not only the clinical aspects (test results, therapy) but also, and more importantly, the psychological and emotional impact on the patient. Touch on topics related to:
  - Physical symptoms (fatigue, pain, nausea - related to ESAS).
  - Emotional state (anxiety, depression, fears, hopes - related to HADS).
  - Quality of life (impact on family, work, social life - related to FACT-Leu).
  - Coping strategies (how the patient deals with stress and the illness - related to COPE).

MANDATORY FORMATTING RULES:
1.  Each turn must start with ">dr: " for the doctor or ">pz: " for the patient, followed by a newline.
2.  Each exchange (a dr/pz pair) must be numbered, starting with "#" followed by the number, for example:
    '''
    #1
    >dr: <first doctor message>
    >pz: <first patient message>
    #2
    >dr: <second doctor message>
    >pz: <second patient message>
    ...
    '''
3.  Never generate more than {exchanges_per_call} exchanges in this response.

INSTRUCTIONS:
{instruction}

{conversation_history}
"##;

const EN_CLOSING: &str = r##"
This is a conversation between a doctor and a patient. The appointment is about to end.
Generate one final exchange, number #{final_exchange_number}, where the doctor and patient say goodbye and conclude the meeting naturally. Keep the same format as before.

CONVERSATION SO FAR:
---
{conversation_history}
---
"##;

const IT_BODY: &str = r##"
Sei un simulatore di dialoghi clinici. Il tuo compito è generare una conversazione realistica, dettagliata e lunga tra un medico ematologo e un paziente affetto da Leucemia.

CONTESTO:
- Malattia: Leucemia. Il paziente è in una fase di trattamento o follow-up.
- Obiettivo del dialogo: La conversazione deve esplorare non solo gli aspetti clinici (risultati degli esami, terapia), ma anche e soprattutto l'impatto psicologico ed emotivo sul paziente. Tocca argomenti relativi a:
  - Sintomi fisici (stanchezza, dolore, nausea - legati a ESAS).
  - Stato emotivo (ansia, depressione, paure, speranze - legati a HADS).
  - Qualità della vita (impatto sulla famiglia, lavoro, socialità - legati a FACT-Leu).
  - Strategie di coping (come il paziente affronta lo stress e la malattia - legati a COPE).

REGOLE DI FORMATTAZIONE OBBLIGATORIE:
1.  Ogni intervento deve iniziare con ">dr: " per il medico o ">pz: " per il paziente, seguito da un a capo.
2.  Ogni scambio (coppia dr/pz) deve essere numerato, iniziando con "#" seguito dal numero. Esempio:
    '''
    #1
    >dr: <primo messaggio del medico>
    >pz: <primo messaggio del paziente>
    #2
    >dr: <secondo messaggio del medico>
    >pz: <secondo messaggio del paziente>
    ...
    '''
3.  Non generare mai più di {exchanges_per_call} scambi in questa risposta.

ISTRUZIONI:
{instruction}

{conversation_history}
"##;

const IT_CLOSING: &str = r##"
Questa è una conversazione tra un medico e un paziente. La visita sta per finire.
Genera un ultimo scambio, il numero #{final_exchange_number}, in cui il medico e il paziente si salutano e concludono l'incontro in modo naturale. Mantieni lo stesso formato di prima.

CONVERSAZIONE FINO AD ORA:
---
{conversation_history}
---
"##;

static ENGLISH: PromptTemplates = PromptTemplates {
    body: EN_BODY,
    closing: EN_CLOSING,
    start_instruction: "Start the conversation from the first exchange (#1).",
    continue_instruction: "Continue the conversation starting from the next exchange (#{next_exchange}).",
    history_heading: "CONVERSATION SO FAR",
};

static ITALIAN: PromptTemplates = PromptTemplates {
    body: IT_BODY,
    closing: IT_CLOSING,
    start_instruction: "Inizia la conversazione dal primo scambio (#1).",
    continue_instruction: "Continua la conversazione partendo dal prossimo scambio (#{next_exchange}).",
    history_heading: "CONVERSAZIONE FINO AD ORA",
};

impl PromptTemplates {
    /// Templates for the given language
    pub fn for_language(language: Language) -> &'static PromptTemplates {
        match language {
            Language::En => &ENGLISH,
            Language::It => &ITALIAN,
        }
    }

    /// Build the prompt for a body chunk.
    ///
    /// With no history the model is told to start at #1; otherwise it is
    /// told to continue at `next_exchange` and given the whole history.
    pub fn body_prompt(&self, exchanges_per_call: u32, next_exchange: u32, history: &str) -> String {
        let (instruction, history_block) = if history.is_empty() {
            (self.start_instruction.to_string(), String::new())
        } else {
            (
                render(
                    self.continue_instruction,
                    &[("next_exchange", next_exchange.to_string())],
                ),
                format!("{}:\n---\n{}\n---", self.history_heading, history),
            )
        };

        render(
            self.body,
            &[
                ("exchanges_per_call", exchanges_per_call.to_string()),
                ("instruction", instruction),
                ("conversation_history", history_block),
            ],
        )
    }

    /// Build the prompt for the closing exchange
    pub fn closing_prompt(&self, final_exchange_number: u32, history: &str) -> String {
        render(
            self.closing,
            &[
                ("final_exchange_number", final_exchange_number.to_string()),
                ("conversation_history", history.to_string()),
            ],
        )
    }
}

/// Substitute `{slot}` placeholders; unknown slots are left as they are.
///
/// Substitution is a single pass, so slot values are never re-expanded.
pub fn render(template: &str, slots: &[(&str, String)]) -> String {
    slot_regex()
        .replace_all(template, |caps: &Captures| {
            slots
                .iter()
                .find(|(name, _)| *name == &caps[1])
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// `{slot}` matcher, compiled on first use
fn slot_regex() -> &'static Regex {
    static SLOT_REGEX: OnceLock<Regex> = OnceLock::new();
    SLOT_REGEX.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("Invalid slot regex"))
}
