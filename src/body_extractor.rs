use std::collections::BTreeMap;

use mail_parser::{Message, MimeHeaders, PartType};

/// Texte de remplacement quand un email n'a aucun contenu textuel
pub const NO_TEXT_CONTENT: &str = "Mail has no text content.";

/// Parcourt l'arbre MIME et collecte les parties textuelles décodées.
///
/// Retourne une table sous-type -> texte (dernier gagnant en cas de doublon
/// au même niveau). mail-parser décode selon le charset déclaré, avec repli
/// UTF-8 ; une partie indéchiffrable contribue un texte vide plutôt que de
/// faire échouer l'extraction du message entier.
pub fn extract(message: &Message) -> BTreeMap<String, String> {
    let mut bodies = BTreeMap::new();
    collect_text_parts(message, &mut bodies);
    bodies
}

fn collect_text_parts(message: &Message, bodies: &mut BTreeMap<String, String>) {
    // Parcours en profondeur, ordre du document préservé entre frères
    let mut stack: Vec<usize> = vec![0];

    while let Some(part_id) = stack.pop() {
        let part = match message.parts.get(part_id) {
            Some(part) => part,
            None => continue,
        };

        match &part.body {
            PartType::Multipart(children) => {
                for &child in children.iter().rev() {
                    stack.push(child);
                }
            }
            PartType::Text(text) => {
                let subtype = part
                    .content_type()
                    .and_then(|content_type| content_type.subtype())
                    .unwrap_or("plain")
                    .to_ascii_lowercase();
                bodies.insert(subtype, text.to_string());
            }
            PartType::Html(text) => {
                bodies.insert("html".to_string(), text.to_string());
            }
            PartType::Message(nested) => {
                // message/rfc822 embarqué : même parcours sur le message imbriqué
                collect_text_parts(nested, bodies);
            }
            _ => {}
        }
    }
}

/// Choisit le texte à transmettre au tracker.
///
/// Priorité : text/plain tel quel, sinon text/html converti en texte avec
/// compression des lignes vides simples, sinon le premier sous-type de la
/// table (ordre lexicographique, donc déterministe), sinon la sentinelle.
pub fn render(bodies: &BTreeMap<String, String>) -> String {
    if let Some(plain) = bodies.get("plain") {
        return plain.clone();
    }

    if let Some(html) = bodies.get("html") {
        let converted = htmd::convert(html).unwrap_or_else(|_| html.clone());
        return collapse_blank_lines(&converted);
    }

    if let Some((_, text)) = bodies.iter().next() {
        return text.clone();
    }

    NO_TEXT_CONTENT.to_string()
}

/// Replie chaque ligne vide simple en un saut de ligne.
///
/// La conversion HTML vers texte insère une ligne vide après chaque ligne ;
/// une passe non chevauchante ramène "a\n\nb" à "a\nb" et "a\n\n\n\nb" à
/// "a\n\nb", si bien qu'une vraie séparation de paragraphe reste visible.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' && chars.peek() == Some(&'\n') {
            chars.next();
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mail_parser::MessageParser;

    fn parse(raw: &str) -> mail_parser::Message<'_> {
        MessageParser::default()
            .parse(raw.as_bytes())
            .expect("test message should parse")
    }

    #[test]
    fn test_plain_takes_priority_over_html() {
        let raw = "From: a@b.c\r\n\
                   Subject: greeting\r\n\
                   MIME-Version: 1.0\r\n\
                   Content-Type: multipart/alternative; boundary=\"XYZ\"\r\n\
                   \r\n\
                   --XYZ\r\n\
                   Content-Type: text/plain; charset=utf-8\r\n\
                   \r\n\
                   Hello\r\n\
                   --XYZ\r\n\
                   Content-Type: text/html; charset=utf-8\r\n\
                   \r\n\
                   <p>Hello</p>\r\n\
                   --XYZ--\r\n";

        let message = parse(raw);
        let bodies = extract(&message);
        assert!(bodies.contains_key("plain"));
        assert!(bodies.contains_key("html"));
        assert_eq!(render(&bodies).trim(), "Hello");
    }

    #[test]
    fn test_html_fallback_is_converted() {
        let raw = "From: a@b.c\r\n\
                   Subject: html only\r\n\
                   MIME-Version: 1.0\r\n\
                   Content-Type: text/html; charset=utf-8\r\n\
                   \r\n\
                   <html><body><p>First line</p><p>Second line</p></body></html>\r\n";

        let message = parse(raw);
        let bodies = extract(&message);
        assert!(!bodies.contains_key("plain"));

        let rendered = render(&bodies);
        assert!(rendered.contains("First line"));
        assert!(rendered.contains("Second line"));
        assert!(!rendered.contains('<'), "tags should be gone: {}", rendered);
    }

    #[test]
    fn test_last_sibling_wins_for_duplicate_subtype() {
        let raw = "From: a@b.c\r\n\
                   Subject: twins\r\n\
                   MIME-Version: 1.0\r\n\
                   Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
                   \r\n\
                   --XYZ\r\n\
                   Content-Type: text/plain; charset=utf-8\r\n\
                   \r\n\
                   first\r\n\
                   --XYZ\r\n\
                   Content-Type: text/plain; charset=utf-8\r\n\
                   \r\n\
                   second\r\n\
                   --XYZ--\r\n";

        let message = parse(raw);
        let bodies = extract(&message);
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies.get("plain").unwrap().trim(), "second");
    }

    #[test]
    fn test_sentinel_when_no_text_parts() {
        let bodies = BTreeMap::new();
        assert_eq!(render(&bodies), NO_TEXT_CONTENT);
    }

    #[test]
    fn test_first_subtype_fallback() {
        let mut bodies = BTreeMap::new();
        bodies.insert("enriched".to_string(), "enriched content".to_string());
        bodies.insert("watch-later".to_string(), "other".to_string());
        // Ni plain ni html : premier sous-type dans l'ordre de la table
        assert_eq!(render(&bodies), "enriched content");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\nb\n\nc"), "a\nb\nc");
        assert_eq!(collapse_blank_lines("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("no blanks"), "no blanks");
        assert_eq!(collapse_blank_lines(""), "");
    }
}
