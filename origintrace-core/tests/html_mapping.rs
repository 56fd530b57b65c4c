//! Rendered markup characters traced back through browser normalization.

use pretty_assertions::assert_eq;

use origintrace_core::dom::NodeData;
use origintrace_core::origin_path::{StepView, step_views};
use origintrace_core::{
    NodeId, OperationKind, Page, RootOrigin, Termination, get_root_origin_at_char,
    where_does_char_come_from,
};

fn element(page: &mut Page, tag: &str) -> NodeId {
    let tag = page.tracer_mut().string_literal(tag).unwrap();
    page.create_element(tag).unwrap()
}

fn set_inner_html(page: &mut Page, el: NodeId, html: &str) {
    let html = page.tracer_mut().string_literal(html).unwrap();
    page.set_inner_html(el, html).unwrap();
}

fn div_with(html: &str) -> (Page, NodeId) {
    let mut page = Page::new();
    let el = element(&mut page, "div");
    set_inner_html(&mut page, el, html);
    (page, el)
}

fn first_child(page: &Page, el: NodeId) -> NodeId {
    page.element_children(el).unwrap()[0]
}

fn first_step(page: &Page, node: NodeId, offset: usize) -> (RootOrigin, StepView) {
    let origin = get_root_origin_at_char(page, node, offset).unwrap();
    let view = StepView::new(page.log(), origin.step).unwrap();
    (origin, view)
}

fn steps(page: &Page, node: NodeId, offset: usize) -> Vec<StepView> {
    let origin = get_root_origin_at_char(page, node, offset).unwrap();
    let path = where_does_char_come_from(page.log(), origin).unwrap();
    assert_eq!(path.termination, Termination::Root);
    step_views(page.log(), &path).unwrap()
}

/// The assigned string literal and the character the path lands on.
fn assigned_source(page: &Page, node: NodeId, offset: usize) -> (String, usize, char) {
    let steps = steps(page, node, offset);
    let source = &steps[1];
    assert_eq!(source.action, "String Literal");
    (
        source.value.clone(),
        source.character_index,
        source.character().unwrap(),
    )
}

#[test]
fn traces_basic_string_assignment() {
    let (page, el) = div_with("Hello");

    // <[d]iv>Hello</div>
    let (_, step) = first_step(&page, el, 1);
    assert_eq!(step.action, "createElement");

    // <div>[H]ello</div>
    let (origin, step) = first_step(&page, el, 5);
    assert!(origin.exact);
    assert_eq!(step.action, "Assign InnerHTML");
    assert_eq!(step.character(), Some('H'));
}

#[test]
fn traces_nested_html_assignments() {
    let (page, el) = div_with("Hello <b>World</b>!");
    let b = first_child(&page, el);

    // <b>[W]orld</b>
    let (_, step) = first_step(&page, b, 3);
    assert_eq!(step.action, "Assign InnerHTML");
    assert_eq!(step.character(), Some('W'));
}

#[test]
fn traces_attributes_without_value() {
    let (page, el) = div_with("<span hello world>Hi</span>");
    assert_eq!(
        page.inner_html(el).unwrap(),
        r#"<span hello="" world="">Hi</span>"#
    );
    let span = first_child(&page, el);

    // <span hello="" world="">[H]i</span>
    let (_, step) = first_step(&page, span, 24);
    assert_eq!(step.action, "Assign InnerHTML");
    assert_eq!(step.character(), Some('H'));

    let (value, _, ch) = assigned_source(&page, span, 24);
    assert_eq!(value, "<span hello world>Hi</span>");
    assert_eq!(ch, 'H');
}

#[test]
fn traces_attributes_with_empty_value() {
    let (page, el) = div_with(r#"<span hello="">Hi</span>"#);
    let span = first_child(&page, el);
    let (value, _, ch) = assigned_source(&page, span, 15);
    assert_eq!(value, r#"<span hello="">Hi</span>"#);
    assert_eq!(ch, 'H');
}

#[test]
fn traces_attribute_value_with_escaped_ampersand() {
    let (page, el) = div_with(r#"<span hi="&amp;test"></span>"#);
    assert_eq!(page.inner_html(el).unwrap(), r#"<span hi="&amp;test"></span>"#);
    let span = first_child(&page, el);
    let (_, _, ch) = assigned_source(&page, span, 15);
    assert_eq!(ch, 't');
}

#[test]
fn traces_attribute_value_with_unescaped_ampersand() {
    let (page, el) = div_with(r#"<span hi="&test"></span>"#);
    assert_eq!(page.inner_html(el).unwrap(), r#"<span hi="&amp;test"></span>"#);
    let span = first_child(&page, el);
    let (value, _, ch) = assigned_source(&page, span, 15);
    assert_eq!(value, r#"<span hi="&test"></span>"#);
    assert_eq!(ch, 't');
}

#[test]
fn traces_attribute_value_with_named_entity() {
    let (page, el) = div_with(r#"<span hi="&raquo;test"></span>"#);
    assert_eq!(page.inner_html(el).unwrap(), r#"<span hi="»test"></span>"#);
    let span = first_child(&page, el);
    let (_, _, ch) = assigned_source(&page, span, 11);
    assert_eq!(ch, 't');
}

#[test]
fn traces_attribute_value_with_numeric_entity() {
    let (page, el) = div_with(r#"<span hi="&#39;world"></span>"#);
    assert_eq!(page.inner_html(el).unwrap(), r#"<span hi="'world"></span>"#);
    let span = first_child(&page, el);

    // <span hi="'worl[d]"></span>
    let (_, _, ch) = assigned_source(&page, span, 15);
    assert_eq!(ch, 'd');
}

#[test]
fn traces_extra_space_at_end_of_tag() {
    let (page, el) = div_with("<span >Hi</span>");
    assert_eq!(page.inner_html(el).unwrap(), "<span>Hi</span>");
    let span = first_child(&page, el);
    let (value, _, ch) = assigned_source(&page, span, 6);
    assert_eq!(value, "<span >Hi</span>");
    assert_eq!(ch, 'H');
}

#[test]
fn traces_space_before_self_closing_slash() {
    let (page, el) = div_with("<span><input \n/>Hey</span>");
    let span = first_child(&page, el);
    assert_eq!(page.inner_html(span).unwrap(), "<input>Hey");

    // <span><input>[H]ey</span>
    let (_, _, ch) = assigned_source(&page, span, 13);
    assert_eq!(ch, 'H');
}

#[test]
fn traces_extra_whitespace_at_end_of_tag() {
    let (page, el) = div_with("<span \n\n\t>Hi</span>");
    assert_eq!(page.inner_html(el).unwrap(), "<span>Hi</span>");
    let span = first_child(&page, el);
    let (_, _, ch) = assigned_source(&page, span, 6);
    assert_eq!(ch, 'H');
}

#[test]
fn traces_attribute_names() {
    for html in [
        r#"<span hi="hey" cake="cookie"></span>"#,
        "<span hi=\"hey\"       \ncake=\"cookie\"></span>",
    ] {
        let (page, el) = div_with(html);
        assert_eq!(
            page.inner_html(el).unwrap(),
            r#"<span hi="hey" cake="cookie"></span>"#
        );
        let span = first_child(&page, el);

        // <span hi="hey" ca[k]e="cookie"></span>
        let (value, _, ch) = assigned_source(&page, span, 17);
        assert_eq!(value, html);
        assert_eq!(ch, 'k');
    }
}

#[test]
fn traces_auto_escaped_ampersand_to_single_character() {
    let (page, el) = div_with("&");
    assert_eq!(page.inner_html(el).unwrap(), "&amp;");

    // <div>&a[m]p;</div>
    let (value, index, _) = assigned_source(&page, el, 7);
    assert_eq!(value, "&");
    assert_eq!(index, 0);
}

#[test]
fn traces_unescaped_entity_character() {
    let (page, el) = div_with("»");
    assert_eq!(page.inner_html(el).unwrap(), "»");
    let (value, index, _) = assigned_source(&page, el, 5);
    assert_eq!(value, "»");
    assert_eq!(index, 0);
}

#[test]
fn traces_decoded_entity_to_entity_start() {
    let (page, el) = div_with("sth&raquo;");
    assert_eq!(page.inner_html(el).unwrap(), "sth»");

    // <div>sth[»]</div>
    let (value, index, _) = assigned_source(&page, el, 8);
    assert_eq!(value, "sth&raquo;");
    assert_eq!(index, 3);
}

#[test]
fn comments_do_not_shift_offsets() {
    let (page, el) = div_with("ab<!-- hi -->cd");
    assert_eq!(page.inner_html(el).unwrap(), "ab<!-- hi -->cd");

    // <div>ab<!-- hi -->[c]d</div>
    let (_, _, ch) = assigned_source(&page, el, 18);
    assert_eq!(ch, 'c');
}

#[test]
fn keeps_track_of_comments() {
    let html = "Hi <!-- World -->";
    let (page, el) = div_with(html);
    let comment = page.children(el).unwrap()[1];
    let NodeData::Comment(comment) = page.document().data(comment).unwrap() else {
        panic!("expected a comment node");
    };

    let start = comment.origin.start[0].unwrap();
    let start_entry = page.log().get(start.entry).unwrap();
    assert_eq!(start_entry.kind, OperationKind::AssignInnerHtml);
    assert_eq!(start_entry.kind.action(), "Assign InnerHTML");

    let text = comment.origin.data[0].unwrap();
    assert_eq!(
        page.log().get(text.entry).unwrap().result.as_str(),
        Some(html)
    );
}

#[test]
fn traces_content_after_self_closing_void_tag() {
    let (page, el) = div_with("<input/>Hello");
    assert_eq!(page.inner_html(el).unwrap(), "<input>Hello");

    // <div><input>H[e]llo</div>
    let (value, index, ch) = assigned_source(&page, el, 13);
    assert_eq!(value, "<input/>Hello");
    assert_eq!(index, 9);
    assert_eq!(ch, 'e');
}

#[test]
fn traces_character_references_inside_noscript() {
    let mut page = Page::new();
    let el = element(&mut page, "noscript");
    set_inner_html(&mut page, el, "&gt;abc&#x3D;");
    assert_eq!(page.inner_html(el).unwrap(), "&amp;gt;abc&amp;#x3D;");

    // <noscript>&amp;[g]t;abc&amp;#x3D;</noscript>
    let (_, _, ch) = assigned_source(&page, el, 15);
    assert_eq!(ch, 'g');

    let (_, _, ch) = assigned_source(&page, el, 26);
    assert_eq!(ch, '#');
}

#[test]
fn traces_content_after_void_tag_with_explicit_end_tag() {
    let (page, el) = div_with("<input></input>Hello");
    assert_eq!(page.inner_html(el).unwrap(), "<input>Hello");
    let (value, _, ch) = assigned_source(&page, el, 13);
    assert_eq!(value, "<input></input>Hello");
    assert_eq!(ch, 'e');
}

#[test]
fn maps_text_containing_crlf() {
    let (page, el) = div_with("<span>ab\r\ncd</span>");
    assert_eq!(page.inner_html(el).unwrap(), "<span>ab\ncd</span>");
    let span = first_child(&page, el);
    let (value, _, ch) = assigned_source(&page, span, 9);
    assert_eq!(value, "<span>ab\r\ncd</span>");
    assert_eq!(ch, 'c');
}

#[test]
fn maps_tags_containing_crlf() {
    let (page, el) = div_with("<span\r\n hi=\"ho\"\r\n>abc</span>");
    assert_eq!(page.inner_html(el).unwrap(), r#"<span hi="ho">abc</span>"#);
    let span = first_child(&page, el);
    let (_, _, ch) = assigned_source(&page, span, 14);
    assert_eq!(ch, 'a');
}

#[test]
fn maps_attributes_containing_crlf() {
    let (page, el) = div_with("<span hi=\"\r\nhey\"></span>");
    assert_eq!(page.inner_html(el).unwrap(), "<span hi=\"\nhey\"></span>");
    let span = first_child(&page, el);
    let (_, index, ch) = assigned_source(&page, span, 11);
    assert_eq!(index, 12);
    assert_eq!(ch, 'h');
}

#[test]
fn supports_insert_adjacent_html_after_begin() {
    let (mut page, el) = div_with(" World");
    let hello = page.tracer_mut().string_literal("Hello").unwrap();
    page.insert_adjacent_html(el, "afterBegin", hello).unwrap();
    assert_eq!(page.inner_html(el).unwrap(), "Hello World");

    // <div>Hello [W]orld</div>
    let (value, _, ch) = assigned_source(&page, el, 11);
    assert_eq!(value, " World");
    assert_eq!(ch, 'W');

    let (_, _, ch) = assigned_source(&page, el, 5);
    assert_eq!(ch, 'H');
}

#[test]
fn supports_whitespace_around_attribute_equals() {
    let (page, el) = div_with("<span a  \t\n =\n   \"b\">Hello</span>");
    assert_eq!(page.inner_html(el).unwrap(), r#"<span a="b">Hello</span>"#);

    // <div><span a="b">[H]ello</span></div>
    let (_, _, ch) = assigned_source(&page, el, 17);
    assert_eq!(ch, 'H');
}

#[test]
fn synthesized_characters_are_approximate() {
    let (page, el) = div_with("<span hello>Hi</span>");
    let span = first_child(&page, el);
    // <span hello[=]"">
    let origin = get_root_origin_at_char(&page, span, 11).unwrap();
    assert!(!origin.exact);
    let path = where_does_char_come_from(page.log(), origin).unwrap();
    assert!(path.approximate);
}

#[test]
fn same_query_gives_same_path() {
    let (page, el) = div_with("Hello <b>World</b>!");
    let first = where_does_char_come_from(
        page.log(),
        get_root_origin_at_char(&page, el, 14).unwrap(),
    )
    .unwrap();
    let second = where_does_char_come_from(
        page.log(),
        get_root_origin_at_char(&page, el, 14).unwrap(),
    )
    .unwrap();
    assert_eq!(first, second);
}

#[test]
fn set_attribute_traces_value_and_name() {
    let mut page = Page::new();
    let el = element(&mut page, "a");
    let name = page.tracer_mut().string_literal("href").unwrap();
    let base = page.tracer_mut().string_literal("/users/").unwrap();
    let id = page.tracer_mut().string_literal("42").unwrap();
    let url = page
        .tracer_mut()
        .dispatch(
            OperationKind::Add,
            vec![base, id],
            origintrace_core::ExtraArgs::default(),
        )
        .unwrap();
    page.set_attribute(el, name, url).unwrap();
    assert_eq!(page.outer_html(el).unwrap(), r#"<a href="/users/42"></a>"#);

    // <a href="/users/4[2]"></a>
    let steps = steps(&page, el, 17);
    assert_eq!(steps[0].action, "setAttribute");
    let last = steps.last().unwrap();
    assert_eq!(last.value, "42");
    assert_eq!(last.character(), Some('2'));

    // <a h[r]ef=...
    let steps = self::steps(&page, el, 4);
    assert_eq!(steps[0].action, "String Literal");
    assert_eq!(steps[0].value, "href");
}

#[test]
fn initial_page_html_is_a_root() {
    let mut page = Page::new();
    page.load_initial_html("<p>\n  Hi</p>", Some("index.html"))
        .unwrap();
    let p = page.element_children(page.root()).unwrap()[0];

    // <p>\n  [H]i</p>
    let steps = steps(&page, p, 6);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].action, "HTML File Content");
    assert_eq!(steps[0].location.as_deref(), Some("index.html:2:2"));
}
