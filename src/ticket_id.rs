use anyhow::Result;
use regex::Regex;

use crate::error::DecodeError;

/// Identité d'un ticket, dérivée une seule fois par email.
///
/// Invariant : `decode(token) == sequence`, et `token` ne contient que des
/// caractères de l'alphabet configuré avec une longueur >= longueur minimale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketIdentity {
    pub sequence: u64,
    pub token: String,
    pub prefixed: String,
}

/// Codec réversible entre numéros de séquence et jetons de ticket.
///
/// L'alphabet configuré est permuté de façon déterministe par le sel
/// (mélange de Fisher-Yates piloté par les octets du sel), puis les numéros
/// sont écrits dans cette base permutée. Le résultat est complété à gauche
/// avec le chiffre zéro permuté jusqu'à la longueur minimale. Le même triplet
/// (sel, alphabet, longueur minimale) produit donc toujours le même jeton,
/// quel que soit le processus ou le client mail.
#[derive(Debug, Clone)]
pub struct TicketIdCodec {
    alphabet: Vec<char>,
    min_length: usize,
    prefix: String,
    subject_regex: Regex,
}

impl TicketIdCodec {
    pub fn new(salt: &str, alphabet: &str, min_length: usize, prefix: &str) -> Result<Self> {
        let chars: Vec<char> = alphabet.chars().collect();

        if chars.len() < 2 {
            anyhow::bail!(
                "L'alphabet des jetons doit contenir au moins 2 caractères (contient: {})",
                chars.len()
            );
        }
        for (i, c) in chars.iter().enumerate() {
            if chars[..i].contains(c) {
                anyhow::bail!("L'alphabet des jetons contient un doublon: '{}'", c);
            }
        }

        let subject_regex = Self::build_subject_regex(alphabet, min_length, prefix)?;

        Ok(TicketIdCodec {
            alphabet: salt_shuffle(chars, salt),
            min_length,
            prefix: prefix.to_string(),
            subject_regex,
        })
    }

    /// Encode un numéro de séquence en jeton.
    pub fn encode(&self, sequence: u64) -> String {
        let base = self.alphabet.len() as u64;
        let mut digits: Vec<char> = Vec::new();
        let mut n = sequence;
        loop {
            digits.push(self.alphabet[(n % base) as usize]);
            n /= base;
            if n == 0 {
                break;
            }
        }
        // Les chiffres zéro de tête ne changent pas la valeur décodée
        while digits.len() < self.min_length {
            digits.push(self.alphabet[0]);
        }
        digits.iter().rev().collect()
    }

    /// Décode un jeton en numéro de séquence.
    pub fn decode(&self, token: &str) -> Result<u64, DecodeError> {
        if token.is_empty() {
            return Err(DecodeError::Empty);
        }
        let base = self.alphabet.len() as u64;
        let mut value: u64 = 0;
        for c in token.chars() {
            let digit = self
                .alphabet
                .iter()
                .position(|&a| a == c)
                .ok_or(DecodeError::InvalidCharacter(c))? as u64;
            value = value
                .checked_mul(base)
                .and_then(|v| v.checked_add(digit))
                .ok_or(DecodeError::Overflow)?;
        }
        Ok(value)
    }

    /// Construit une identité neuve à partir d'un numéro de séquence (UID mailbox).
    pub fn identity_from_sequence(&self, sequence: u64) -> TicketIdentity {
        let token = self.encode(sequence);
        let prefixed = format!("{}{}", self.prefix, token);
        TicketIdentity {
            sequence,
            token,
            prefixed,
        }
    }

    /// Reconstruit une identité à partir d'un jeton existant (header ou objet).
    pub fn identity_from_token(&self, token: &str) -> Result<TicketIdentity, DecodeError> {
        let sequence = self.decode(token)?;
        Ok(TicketIdentity {
            sequence,
            token: token.to_string(),
            prefixed: format!("{}{}", self.prefix, token),
        })
    }

    /// Cherche un jeton `[#<prefix><token>]` dans une ligne d'objet.
    pub fn find_token_in_subject(&self, subject: &str) -> Option<String> {
        self.subject_regex
            .captures(subject)
            .and_then(|captures| captures.get(1))
            .map(|token| token.as_str().to_string())
    }

    fn build_subject_regex(alphabet: &str, min_length: usize, prefix: &str) -> Result<Regex> {
        let class: String = alphabet.chars().map(escape_for_class).collect();
        let pattern = format!(
            "\\[#{}([{}]{{{},}}?)\\]",
            regex::escape(prefix),
            class,
            min_length
        );
        Regex::new(&pattern)
            .map_err(|e| anyhow::anyhow!("Alphabet de jetons inutilisable dans une regex: {}", e))
    }
}

/// Echappe un caractère destiné à une classe de caractères regex.
fn escape_for_class(c: char) -> String {
    match c {
        '\\' | ']' | '^' | '-' | '[' | '&' => format!("\\{}", c),
        _ => c.to_string(),
    }
}

/// Mélange de Fisher-Yates piloté par le sel, identique à chaque exécution.
fn salt_shuffle(mut chars: Vec<char>, salt: &str) -> Vec<char> {
    let salt_bytes = salt.as_bytes();
    if salt_bytes.is_empty() || chars.len() < 2 {
        return chars;
    }

    let mut v = 0usize;
    let mut p = 0usize;
    let mut i = chars.len() - 1;
    while i > 0 {
        v %= salt_bytes.len();
        let t = salt_bytes[v] as usize;
        p += t;
        let j = (t + v + p) % i;
        chars.swap(i, j);
        v += 1;
        i -= 1;
    }
    chars
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890";

    fn default_codec() -> TicketIdCodec {
        TicketIdCodec::new("JicketSalt", ALPHABET, 6, "JI-").unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let codec = default_codec();
        for n in 0..2000u64 {
            let token = codec.encode(n);
            assert_eq!(codec.decode(&token).unwrap(), n, "roundtrip failed for {}", n);
        }
        for n in [u64::MAX, u64::MAX - 1, 1 << 40, 987654321] {
            let token = codec.encode(n);
            assert_eq!(codec.decode(&token).unwrap(), n);
        }
    }

    #[test]
    fn test_token_shape() {
        let codec = default_codec();
        for n in [0u64, 1, 42, 100000] {
            let token = codec.encode(n);
            assert!(token.len() >= 6, "token '{}' shorter than min length", token);
            assert!(
                token.chars().all(|c| ALPHABET.contains(c)),
                "token '{}' contains characters outside the alphabet",
                token
            );
        }
    }

    #[test]
    fn test_deterministic_across_instances() {
        let first = default_codec();
        let second = default_codec();
        assert_eq!(first.encode(1234), second.encode(1234));
    }

    #[test]
    fn test_salt_changes_tokens() {
        let first = TicketIdCodec::new("JicketSalt", ALPHABET, 6, "JI-").unwrap();
        let second = TicketIdCodec::new("AnotherSalt", ALPHABET, 6, "JI-").unwrap();
        assert_ne!(first.encode(42), second.encode(42));
    }

    #[test]
    fn test_decode_rejects_foreign_characters() {
        let codec = default_codec();
        assert_eq!(
            codec.decode("AB12cD"),
            Err(DecodeError::InvalidCharacter('c'))
        );
        assert_eq!(codec.decode(""), Err(DecodeError::Empty));
        assert_eq!(
            codec.decode("AB-12"),
            Err(DecodeError::InvalidCharacter('-'))
        );
    }

    #[test]
    fn test_decode_rejects_overflow() {
        let codec = default_codec();
        let oversized: String = std::iter::repeat('9').take(64).collect();
        assert_eq!(codec.decode(&oversized), Err(DecodeError::Overflow));
    }

    #[test]
    fn test_arbitrary_alphabet_token_decodes() {
        // Un jeton repris d'une ligne d'objet n'est pas forcément issu de
        // notre propre encodage, il doit quand même se décoder
        let codec = default_codec();
        assert!(codec.decode("AB12CD").is_ok());
    }

    #[test]
    fn test_identity_prefix() {
        let codec = default_codec();
        let identity = codec.identity_from_sequence(7);
        assert_eq!(identity.prefixed, format!("JI-{}", identity.token));
        assert_eq!(codec.decode(&identity.token).unwrap(), 7);
    }

    #[test]
    fn test_find_token_in_subject() {
        let codec = default_codec();
        assert_eq!(
            codec.find_token_in_subject("Re: [#JI-AB12CD] Printer broken"),
            Some("AB12CD".to_string())
        );
        assert_eq!(codec.find_token_in_subject("Printer broken"), None);
        // Prefix has to match exactly
        assert_eq!(codec.find_token_in_subject("[#XX-AB12CD] hello"), None);
        // Too short for the configured minimum length
        assert_eq!(codec.find_token_in_subject("[#JI-AB12] hello"), None);
    }

    #[test]
    fn test_config_validation() {
        assert!(TicketIdCodec::new("salt", "A", 6, "JI-").is_err());
        assert!(TicketIdCodec::new("salt", "ABCA", 6, "JI-").is_err());
        assert!(TicketIdCodec::new("salt", "AB", 0, "JI-").is_ok());
    }
}
