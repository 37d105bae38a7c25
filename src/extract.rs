use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::model::ShopDetail;
use crate::rules::ExtractRules;

// Priority order matters: mobile first, then the international mobile form,
// then the Seoul metro code, then any other regional landline.
static PHONE_PATTERNS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        Regex::new(r"010[-.\s]?\d{4}[-.\s]?\d{4}").unwrap(),
        Regex::new(r"\+82[-.\s]?10[-.\s]?\d{4}[-.\s]?\d{4}").unwrap(),
        Regex::new(r"02[-.\s]?\d{3,4}[-.\s]?\d{4}").unwrap(),
        Regex::new(r"0\d{1,2}[-.\s]?\d{3,4}[-.\s]?\d{4}").unwrap(),
    ]
});

// Street-address fragments like "72-1" must never pass as phone numbers.
static STREET_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{1,2}-\d{1,2}$").unwrap());

static META_DESCRIPTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="description"]"#).unwrap());

const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Derive the typed attributes of one rendered detail page. Total function:
/// a field the cascades cannot resolve comes back empty, never an error.
pub fn extract(html: &str, rules: &ExtractRules) -> ShopDetail {
    let doc = Html::parse_document(html);
    let lines = visible_lines(&doc);

    let mut detail = ShopDetail {
        phone: extract_phone(&lines.join("\n")),
        hours: extract_hours(&lines, rules),
        address_detail: extract_address_detail(&lines, rules),
        ..ShopDetail::default()
    };

    assemble_description(&lines, rules, &mut detail);
    if detail.description.is_empty() {
        detail.description = meta_description(&doc);
    }

    detail
}

/// Visible text of the document as trimmed, non-empty lines.
fn visible_lines(doc: &Html) -> Vec<String> {
    let mut text = String::new();
    collect_text(doc.root_element(), &mut text);
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn collect_text(el: ElementRef, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(&text.text);
            continue;
        }
        if let Some(child_el) = ElementRef::wrap(child) {
            if HIDDEN_TAGS.contains(&child_el.value().name()) {
                continue;
            }
            collect_text(child_el, out);
            out.push('\n');
        }
    }
}

fn extract_phone(text: &str) -> String {
    for pattern in PHONE_PATTERNS.iter() {
        let Some(m) = pattern.find(text) else { continue };
        let mut phone = m.as_str().replace(' ', "").replace('.', "-");
        if STREET_NUMBER_RE.is_match(&phone) {
            // False positive from an address; fall through to the next form.
            continue;
        }
        if let Some(rest) = phone.strip_prefix("+82") {
            let digits = format!("0{}", rest.replace('-', ""));
            phone = if digits.len() == 11 && digits.starts_with("010") {
                format!("{}-{}-{}", &digits[..3], &digits[3..7], &digits[7..])
            } else {
                digits
            };
        }
        return phone;
    }
    String::new()
}

fn extract_hours(lines: &[String], rules: &ExtractRules) -> String {
    for (i, line) in lines.iter().enumerate() {
        if rules.hours_keywords.iter().any(|kw| line.contains(kw.as_str())) {
            // Directory pages often wrap the schedule onto a second line.
            return match lines.get(i + 1) {
                Some(next) => format!("{line} {next}"),
                None => line.clone(),
            };
        }
    }
    String::new()
}

fn extract_address_detail(lines: &[String], rules: &ExtractRules) -> String {
    lines
        .iter()
        .find(|l| rules.region_tokens.iter().any(|kw| l.contains(kw.as_str())))
        .cloned()
        .unwrap_or_default()
}

/// The defining cascade: anchor detection, then verbatim collection, with
/// the cutoff check ahead of the boilerplate filter on every collected line.
fn assemble_description(lines: &[String], rules: &ExtractRules, detail: &mut ShopDetail) {
    let Some(anchor) = lines
        .iter()
        .position(|l| rules.intro_anchors.iter().any(|kw| l.contains(kw.as_str())))
    else {
        return;
    };

    let mut parts: Vec<&str> = Vec::new();
    for (i, line) in lines.iter().enumerate().skip(anchor + 1) {
        let is_price = rules.price_markers.iter().any(|kw| line.contains(kw.as_str()));
        let is_ratio = rules.ratio_markers.iter().any(|kw| line.contains(kw.as_str()));
        if is_price || is_ratio {
            // The marker line itself is chrome; the value sits on the line
            // after it.
            if let Some(next) = lines.get(i + 1) {
                if is_price {
                    detail.price_info = next.clone();
                }
                if is_ratio {
                    detail.payment_methods.push(next.clone());
                }
            }
            break;
        }
        if line.chars().count() > 1
            && !rules.skip_tokens.iter().any(|kw| line.contains(kw.as_str()))
            && !parts.contains(&line.as_str())
        {
            parts.push(line);
        }
    }

    detail.description = parts.join("\n");
}

fn meta_description(doc: &Html) -> String {
    doc.select(&META_DESCRIPTION_SEL)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .unwrap_or_default()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> String {
        format!("<html><head></head><body>{body}</body></html>")
    }

    fn run(body: &str) -> ShopDetail {
        extract(&page(body), &ExtractRules::default())
    }

    #[test]
    fn mobile_phone_wins_over_landline() {
        let detail = run("<p>대표 02-123-4567</p><p>문의 010-1234-5678</p>");
        assert_eq!(detail.phone, "010-1234-5678");
    }

    #[test]
    fn phone_separators_normalize_to_dashes() {
        assert_eq!(run("<p>010.1234.5678</p>").phone, "010-1234-5678");
        assert_eq!(run("<p>010 1234 5678</p>").phone, "010-1234-5678");
    }

    #[test]
    fn international_mobile_collapses_to_local_form() {
        let detail = run("<p>연락처 +82 10 1234 5678</p>");
        assert_eq!(detail.phone, "010-1234-5678");
    }

    #[test]
    fn street_number_is_not_a_phone() {
        let detail = run("<p>72-1</p>");
        assert_eq!(detail.phone, "");
    }

    #[test]
    fn metro_landline_accepted_when_no_mobile() {
        let detail = run("<p>02-123-4567</p>");
        assert_eq!(detail.phone, "02-123-4567");
    }

    #[test]
    fn hours_joins_the_following_line() {
        let detail = run("<p>영업시간</p><p>11:00 - 21:00</p>");
        assert_eq!(detail.hours, "영업시간 11:00 - 21:00");
    }

    #[test]
    fn first_hours_line_wins() {
        let detail = run("<p>영업시간 매일</p><p>브레이크타임</p><p>오픈 준비중</p>");
        assert_eq!(detail.hours, "영업시간 매일 브레이크타임");
    }

    #[test]
    fn description_collects_after_anchor_until_price_marker() {
        let detail = run(concat!(
            "<p>점심특선 안내</p>",
            "<p>한상 가득 정갈한 반찬</p>",
            "<p>셀프바 이용 가능</p>",
            "<p>VERY단가</p>",
            "<p>1,200원</p>",
        ));
        assert_eq!(detail.description, "한상 가득 정갈한 반찬\n셀프바 이용 가능");
        assert_eq!(detail.price_info, "1,200원");
    }

    #[test]
    fn ratio_marker_captures_payment_method() {
        let detail = run(concat!(
            "<p>쌈밥 정식</p>",
            "<p>넉넉한 곁들임</p>",
            "<p>결제비율</p>",
            "<p>100%</p>",
        ));
        assert_eq!(detail.description, "넉넉한 곁들임");
        assert_eq!(detail.payment_methods, vec!["100%".to_string()]);
    }

    #[test]
    fn chrome_tokens_and_duplicates_are_skipped() {
        let detail = run(concat!(
            "<p>오리탕 전문</p>",
            "<p>깊고 진한 국물</p>",
            "<p>verypay Logo</p>",
            "<p>깊고 진한 국물</p>",
            "<p>포장 주문 환영</p>",
        ));
        assert_eq!(detail.description, "깊고 진한 국물\n포장 주문 환영");
    }

    #[test]
    fn meta_tag_is_the_last_resort() {
        let html = concat!(
            "<html><head><meta name=\"description\" content=\"Great food\"></head>",
            "<body><p>nothing to see</p></body></html>",
        );
        let detail = extract(html, &ExtractRules::default());
        assert_eq!(detail.description, "Great food");
    }

    #[test]
    fn anchor_presence_suppresses_meta_fallback() {
        let html = concat!(
            "<html><head><meta name=\"description\" content=\"Great food\"></head>",
            "<body><p>점심특선</p><p>오늘의 반찬 구성</p></body></html>",
        );
        let detail = extract(html, &ExtractRules::default());
        assert_eq!(detail.description, "오늘의 반찬 구성");
    }

    #[test]
    fn region_line_becomes_address_detail() {
        let detail = run("<p>오시는 길</p><p>광주 남구 백운동 72-1</p>");
        assert_eq!(detail.address_detail, "광주 남구 백운동 72-1");
    }

    #[test]
    fn script_and_style_text_is_invisible() {
        let detail = run(concat!(
            "<script>var phone = '010-9999-8888';</script>",
            "<style>.x { content: '영업시간'; }</style>",
            "<p>조용한 페이지</p>",
        ));
        assert_eq!(detail.phone, "");
        assert_eq!(detail.hours, "");
    }

    #[test]
    fn empty_document_yields_empty_record() {
        assert_eq!(extract("", &ExtractRules::default()), ShopDetail::default());
    }
}
