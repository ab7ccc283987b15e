use super::{
    content::Content,
    contenttype::{escape_html, pix_icon, ContentType, Feature},
};

/// H5P packages (`.h5p`).
pub struct H5p;

impl ContentType for H5p {
    fn plugin_name(&self) -> &'static str {
        "h5p"
    }

    fn implemented_features(&self) -> &'static [Feature] {
        &[Feature::Upload]
    }

    fn manageable_extensions(&self) -> &'static [&'static str] {
        &[".h5p"]
    }

    fn view_content(&self, content: &Content, fileurl: &str) -> String {
        let mut html = format!("<h2>{}</h2>", escape_html(content.name()));
        html.push_str(&format!(
            r#"<div class="h5p-player" data-content-id="{}" data-fileurl="{}"></div>"#,
            content.id(),
            escape_html(fileurl)
        ));
        html
    }

    fn icon(&self, contentname: &str) -> String {
        pix_icon("f/h5p-64", contentname)
    }
}
