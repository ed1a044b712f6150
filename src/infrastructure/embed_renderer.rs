use crate::application::{Message, MessageField, RenderContext, Renderer};
use crate::domain::Item;

const DESCRIPTION_LIMIT: usize = 150;
const FOOTER: &str = "tagwatch • 👎 to remove";

/// Renders posts as rich embeds pointing back at the site.
pub struct EmbedRenderer {
    site_url: String,
    static_url: String,
}

impl EmbedRenderer {
    pub fn new(site_url: impl Into<String>, static_url: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into().trim_end_matches('/').to_string(),
            static_url: static_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `file.url` is null for posts on the site-wide blacklist even though
    /// the file is served, so the path is rebuilt from the md5. Samples are
    /// always jpg and embed where videos cannot.
    fn image_url(&self, item: &Item) -> Option<String> {
        let md5 = item
            .file
            .md5
            .as_deref()
            .filter(|m| m.len() >= 4 && m.chars().all(|c| c.is_ascii_hexdigit()))?;
        let (dir, ext) = if item.has_sample {
            ("/data/sample/", "jpg")
        } else {
            ("/data/", item.file.ext.as_deref()?)
        };
        Some(format!(
            "{}{}{}/{}/{}.{}",
            self.static_url,
            dir,
            md5.get(0..2)?,
            md5.get(2..4)?,
            md5,
            ext
        ))
    }
}

impl Default for EmbedRenderer {
    fn default() -> Self {
        Self::new("https://e621.net", "https://static1.e621.net")
    }
}

impl Renderer for EmbedRenderer {
    fn render(&self, item: &Item, context: &RenderContext) -> Message {
        let mut fields = Vec::new();
        if item.is_animated() {
            fields.push(MessageField {
                name: "Animated".into(),
                value: String::new(),
            });
        }
        fields.push(match context {
            RenderContext::MatchedQuery(q) => MessageField {
                name: "Matched query".into(),
                value: format!("`{q}`"),
            },
            RenderContext::PopularToday => MessageField {
                name: "Popular today".into(),
                value: String::new(),
            },
        });

        let artists = item.tags_in("artist").join(", ");

        Message {
            title: format!("#{}", item.id),
            url: format!("{}/posts/{}", self.site_url, item.id),
            description: truncate(&item.description, DESCRIPTION_LIMIT),
            image_url: self.image_url(item),
            author: (!artists.is_empty()).then_some(artists),
            timestamp: Some(item.created_at),
            fields,
            footer: Some(FOOTER.to_string()),
        }
    }
}

fn truncate(s: &str, limit: usize) -> String {
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(limit).collect();
    if chars.next().is_some() {
        format!("{head}..")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::domain::MediaFile;

    fn post(ext: &str, has_sample: bool) -> Item {
        let mut tags = BTreeMap::new();
        tags.insert("artist".into(), vec!["a".into(), "b".into()]);
        Item {
            id: 99,
            created_at: Utc::now(),
            tags,
            file: MediaFile {
                md5: Some("d41d8cd98f00b204e9800998ecf8427e".into()),
                ext: Some(ext.into()),
                url: None,
            },
            has_sample,
            description: "x".repeat(200),
            score: 0,
        }
    }

    #[test]
    fn rebuilds_image_url_and_prefers_sample() {
        let r = EmbedRenderer::default();
        let m = r.render(&post("png", false), &RenderContext::PopularToday);
        assert_eq!(
            m.image_url.as_deref(),
            Some("https://static1.e621.net/data/d4/1d/d41d8cd98f00b204e9800998ecf8427e.png")
        );

        let m = r.render(&post("webm", true), &RenderContext::PopularToday);
        assert_eq!(
            m.image_url.as_deref(),
            Some("https://static1.e621.net/data/sample/d4/1d/d41d8cd98f00b204e9800998ecf8427e.jpg")
        );
        assert_eq!(m.fields[0].name, "Animated");
    }

    #[test]
    fn carries_title_author_and_context() {
        let m = EmbedRenderer::default().render(
            &post("png", false),
            &RenderContext::MatchedQuery("fox".into()),
        );
        assert_eq!(m.title, "#99");
        assert_eq!(m.url, "https://e621.net/posts/99");
        assert_eq!(m.author.as_deref(), Some("a, b"));
        assert_eq!(m.description.chars().count(), DESCRIPTION_LIMIT + 2);
        assert!(m.description.ends_with(".."));
        assert_eq!(m.fields.last().unwrap().value, "`fox`");
    }

    #[test]
    fn malformed_md5_yields_no_image() {
        let mut item = post("png", false);
        item.file.md5 = Some("ééééé".into());
        let m = EmbedRenderer::default().render(&item, &RenderContext::PopularToday);
        assert_eq!(m.image_url, None);

        item.file.md5 = None;
        let m = EmbedRenderer::default().render(&item, &RenderContext::PopularToday);
        assert_eq!(m.image_url, None);
    }

    #[test]
    fn short_descriptions_are_untouched() {
        assert_eq!(truncate("hello", 150), "hello");
    }
}
