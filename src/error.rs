use thiserror::Error;

/// Echec du décodage d'un jeton de ticket.
///
/// Un jeton corrompu ou forgé ne doit jamais créer silencieusement un ticket
/// en double : l'appelant laisse le mail en boîte de réception et journalise
/// l'erreur pour inspection manuelle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("le jeton est vide")]
    Empty,

    #[error("le caractère '{0}' ne fait pas partie de l'alphabet configuré")]
    InvalidCharacter(char),

    #[error("le jeton dépasse la plage des numéros de séquence")]
    Overflow,
}
