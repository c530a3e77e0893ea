//! Segmenter: cleaned line-oriented statute text to an ordered article list.
//!
//! Lines are classified in priority order: numbered-article marker,
//! structural-header marker, candidate title, ignored. A candidate title is
//! held as pending until the next article consumes it; headers discard it.

use std::collections::HashMap;

use tracing::debug;

use statutesync_shared::{Article, ArticleKind};

use crate::markers::{HeaderMatch, MarkerTable};

/// Splits cleaned statute text into [`Article`] records.
#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    markers: MarkerTable,
}

impl Segmenter {
    pub fn new(markers: MarkerTable) -> Self {
        Self { markers }
    }

    pub fn markers(&self) -> &MarkerTable {
        &self.markers
    }

    /// Segment a block of text. Blank lines are skipped; surrounding
    /// whitespace on each line is not significant.
    pub fn segment(&self, text: &str) -> Vec<Article> {
        self.segment_lines(text.lines())
    }

    /// Segment an already-split sequence of lines.
    pub fn segment_lines<'a, I>(&self, lines: I) -> Vec<Article>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = SegmentState::default();

        for line in lines.into_iter().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(number) = self.markers.article_number(line) {
                let content = match state.pending_title.take() {
                    Some(title) => format!("{title}\n{line}"),
                    None => line.to_string(),
                };
                let number = state.unique_number(number);
                state.push(number, content, ArticleKind::Article);
            } else if let Some(header) = self.markers.header(line) {
                state.pending_title = None;
                let number = state.header_number(&header);
                state.push(number, line.to_string(), ArticleKind::StructuralHeader);
            } else if self.markers.is_title_candidate(line) {
                state.pending_title = Some(line.to_string());
            } else {
                debug!(line, "line not segmented");
            }
        }

        debug!(count = state.articles.len(), "segmentation complete");
        state.articles
    }
}

#[derive(Default)]
struct SegmentState {
    articles: Vec<Article>,
    pending_title: Option<String>,
    /// Open structural headers as `(level, designation)`, outermost first.
    ancestors: Vec<(u8, String)>,
    /// How many times each base number has been claimed.
    seen: HashMap<String, u32>,
}

impl SegmentState {
    fn push(&mut self, number: String, content: String, kind: ArticleKind) {
        let order = self.articles.len() as u32 + 1;
        self.articles.push(Article::new(number, content, order, kind));
    }

    fn is_taken(&self, number: &str) -> bool {
        self.seen.contains_key(number)
    }

    /// Claim `number`, suffixing ` [n]` on collision.
    fn unique_number(&mut self, number: String) -> String {
        let count = self.seen.entry(number.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            return number;
        }

        let mut n = *count;
        loop {
            let candidate = format!("{number} [{n}]");
            if !self.is_taken(&candidate) {
                self.seen.insert(candidate.clone(), 1);
                return candidate;
            }
            n += 1;
        }
    }

    /// Number a header, qualifying a repeated designation with its enclosing
    /// headers (nearest first) before falling back to ` [n]`.
    fn header_number(&mut self, header: &HeaderMatch) -> String {
        self.ancestors.retain(|(level, _)| *level < header.level);

        let mut number = header.designation.clone();
        if self.is_taken(&number) {
            for depth in 1..=self.ancestors.len() {
                let start = self.ancestors.len() - depth;
                let mut parts: Vec<&str> = self.ancestors[start..]
                    .iter()
                    .map(|(_, d)| d.as_str())
                    .collect();
                parts.push(&header.designation);
                let qualified = parts.join(", ");
                number = qualified;
                if !self.is_taken(&number) {
                    break;
                }
            }
        }

        self.ancestors.push((header.level, header.designation.clone()));
        self.unique_number(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: &str = include_str!("../../../../fixtures/text/statute_v1.txt");
    const V2: &str = include_str!("../../../../fixtures/text/statute_v2.txt");

    fn numbers(articles: &[Article]) -> Vec<&str> {
        articles.iter().map(|a| a.number.as_str()).collect()
    }

    #[test]
    fn segments_fixture_v1() {
        let articles = Segmenter::default().segment(V1);
        assert_eq!(
            numbers(&articles),
            vec![
                "PARTE GERAL",
                "TÍTULO I",
                "Art. 1",
                "Art. 2",
                "CAPÍTULO I",
                "Art. 3",
                "Art. 3-A",
                "TÍTULO II",
                "TÍTULO II, CAPÍTULO I",
                "Art. 121",
            ]
        );

        assert_eq!(articles[0].kind, ArticleKind::StructuralHeader);
        assert_eq!(articles[2].kind, ArticleKind::Article);
        assert_eq!(
            articles[2].content,
            "Anterioridade da Lei\nArt. 1º Não há crime sem lei anterior que o defina. (Redação dada pela Lei nº 7.209, de 11.7.1984)"
        );
        assert!(articles[5].content.starts_with("DO CRIME\nArt. 3º"));
        assert!(articles[6].content.starts_with("Art. 3º-A"));
        assert_eq!(articles[9].content, "Homicídio simples\nArt. 121. Matar alguém:");
        assert_eq!(articles[8].content, "CAPÍTULO I");
    }

    #[test]
    fn orders_are_dense() {
        for text in [V1, V2, "", "solto\n\n   \n"] {
            let articles = Segmenter::default().segment(text);
            let orders: Vec<u32> = articles.iter().map(|a| a.order).collect();
            let expected: Vec<u32> = (1..=articles.len() as u32).collect();
            assert_eq!(orders, expected);
        }
    }

    #[test]
    fn segmentation_is_deterministic() {
        let s = Segmenter::default();
        assert_eq!(s.segment(V1), s.segment(V1));
        assert_eq!(s.segment(V2), s.segment(V2));
    }

    #[test]
    fn latest_title_candidate_wins() {
        let text = "Primeiro título\nSegundo título\nArt. 9 Texto do artigo.";
        let articles = Segmenter::default().segment(text);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].content, "Segundo título\nArt. 9 Texto do artigo.");
    }

    #[test]
    fn title_limits_decide_what_precedes_an_article() {
        let s = Segmenter::default();
        let at_limit = "t".repeat(79);
        let over_limit = "t".repeat(80);

        let articles = s.segment(&format!("{at_limit}\nArt. 1 a."));
        assert_eq!(articles[0].content, format!("{at_limit}\nArt. 1 a."));
        let articles = s.segment(&format!("{over_limit}\nArt. 1 a."));
        assert_eq!(articles[0].content, "Art. 1 a.");

        let eight = "um dois três quatro cinco seis sete oito";
        let nine = "um dois três quatro cinco seis sete oito nove";
        let articles = s.segment(&format!("{eight}\nArt. 1 a."));
        assert_eq!(articles[0].content, format!("{eight}\nArt. 1 a."));
        let articles = s.segment(&format!("{nine}\nArt. 1 a."));
        assert_eq!(articles[0].content, "Art. 1 a.");

        let articles = s.segment("Disposições finais.\nArt. 1 a.");
        assert_eq!(articles[0].content, "Art. 1 a.");
    }

    #[test]
    fn dotted_article_numbers_stay_distinct() {
        let text = "Art. 1 Primeiro.\nArt. 2 Segundo.\nArt. 1.025 Terceiro.\nArt. 1.026 Quarto.";
        let articles = Segmenter::default().segment(text);
        assert_eq!(
            numbers(&articles),
            vec!["Art. 1", "Art. 2", "Art. 1.025", "Art. 1.026"]
        );

        // Inserting an article does not relabel the ones after it.
        let text = "Art. 1 Primeiro.\nArt. 1.024 Novo.\nArt. 1.025 Terceiro.";
        let articles = Segmenter::default().segment(text);
        assert_eq!(numbers(&articles), vec!["Art. 1", "Art. 1.024", "Art. 1.025"]);
    }

    #[test]
    fn header_discards_pending_title() {
        let text = "Rubrica solta\nCAPÍTULO IV\nArt. 9 Texto.";
        let articles = Segmenter::default().segment(text);
        assert_eq!(numbers(&articles), vec!["CAPÍTULO IV", "Art. 9"]);
        assert_eq!(articles[1].content, "Art. 9 Texto.");
    }

    #[test]
    fn ignored_lines_keep_pending_title() {
        let text = "Furto\nUma frase longa o bastante. Com ponto final.\nArt. 155. Subtrair.";
        let articles = Segmenter::default().segment(text);
        assert_eq!(articles[0].content, "Furto\nArt. 155. Subtrair.");
    }

    #[test]
    fn continuation_lines_are_not_titles() {
        let text = "Art. 1 Caput.\n§ 1º Parágrafo\nI - inciso\nArt. 2 Outro.";
        let articles = Segmenter::default().segment(text);
        assert_eq!(articles[1].content, "Art. 2 Outro.");
    }

    #[test]
    fn duplicate_numbers_are_disambiguated() {
        let text = "Art. 5 Primeiro.\nArt. 5 Segundo.\nArt. 5 Terceiro.";
        let articles = Segmenter::default().segment(text);
        assert_eq!(numbers(&articles), vec!["Art. 5", "Art. 5 [2]", "Art. 5 [3]"]);
    }

    #[test]
    fn repeated_header_without_ancestors_gets_suffix() {
        let text = "CAPÍTULO I\nArt. 1 a.\nCAPÍTULO I\nArt. 2 b.";
        let articles = Segmenter::default().segment(text);
        assert_eq!(
            numbers(&articles),
            vec!["CAPÍTULO I", "Art. 1", "CAPÍTULO I [2]", "Art. 2"]
        );
    }

    #[test]
    fn repeated_headers_are_qualified_nearest_first() {
        let text = "LIVRO I\nTÍTULO I\nCAPÍTULO I\nLIVRO II\nTÍTULO I\nCAPÍTULO I\nLIVRO III\nTÍTULO I\nCAPÍTULO I";
        let articles = Segmenter::default().segment(text);
        assert_eq!(
            numbers(&articles),
            vec![
                "LIVRO I",
                "TÍTULO I",
                "CAPÍTULO I",
                "LIVRO II",
                "LIVRO II, TÍTULO I",
                "TÍTULO I, CAPÍTULO I",
                "LIVRO III",
                "LIVRO III, TÍTULO I",
                "LIVRO III, TÍTULO I, CAPÍTULO I",
            ]
        );
    }

    #[test]
    fn degenerate_input_yields_nothing() {
        assert!(Segmenter::default().segment("").is_empty());
        assert!(Segmenter::default().segment("apenas texto solto").is_empty());
    }
}
