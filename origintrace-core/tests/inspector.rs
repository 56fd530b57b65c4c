//! Inspector requests answered over the channel boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use origintrace_core::inspector::{channel, serve};
use origintrace_core::{InspectorQuery, InspectorResponse, NodeId, Page, Selection};

fn hello_page() -> (Page, NodeId) {
    let mut page = Page::new();
    let tag = page.tracer_mut().string_literal("div").unwrap();
    let el = page.create_element(tag).unwrap();
    let greeting = page.tracer_mut().string_literal("Hello ").unwrap();
    let name = page.tracer_mut().string_literal("World").unwrap();
    let html = page
        .tracer_mut()
        .dispatch(
            origintrace_core::OperationKind::Add,
            vec![greeting, name],
            Default::default(),
        )
        .unwrap();
    page.set_inner_html(el, html).unwrap();
    (page, el)
}

#[tokio::test]
async fn root_origin_then_full_path() {
    let (page, el) = hello_page();
    let (client, requests) = channel();

    let ui = async move {
        // <div>Hello [W]orld</div>
        let response = client
            .send(InspectorQuery::RootOriginAtChar {
                node: el,
                offset: 11,
            })
            .recv()
            .await
            .unwrap();
        let InspectorResponse::RootOrigin { origin, step } = response else {
            panic!("unexpected response: {response:?}");
        };
        assert_eq!(step.action, "Assign InnerHTML");
        assert_eq!(step.character(), Some('W'));

        client
            .send(InspectorQuery::WhereDoesCharComeFrom { origin })
            .recv()
            .await
            .unwrap()
    };

    let (answered, response) = tokio::join!(serve(&page, requests), ui);
    assert_eq!(answered, 2);
    let InspectorResponse::OriginPath { steps, .. } = response else {
        panic!("unexpected response: {response:?}");
    };
    let actions: Vec<&str> = steps.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(actions, vec!["Assign InnerHTML", "Add", "String Literal"]);
    let last = steps.last().unwrap();
    assert_eq!(last.value, "World");
    assert_eq!(last.character_index, 0);
}

#[tokio::test]
async fn cancelled_request_is_skipped() {
    let (page, el) = hello_page();
    let (client, requests) = channel();

    let stale = client.send(InspectorQuery::RootOriginAtChar {
        node: el,
        offset: 5,
    });
    stale.cancel();
    let fresh = client.send(InspectorQuery::RootOriginAtChar {
        node: el,
        offset: 6,
    });
    drop(client);

    assert_eq!(serve(&page, requests).await, 1);
    assert!(stale.recv().await.is_none());
    let Some(InspectorResponse::RootOrigin { step, .. }) = fresh.recv().await else {
        panic!("expected a root origin");
    };
    assert_eq!(step.character(), Some('e'));
}

#[tokio::test]
async fn slow_response_notice_fires_once() {
    let (page, el) = hello_page();
    let (client, requests) = channel();
    let noticed = AtomicBool::new(false);

    let pending = client.send(InspectorQuery::RootOriginAtChar {
        node: el,
        offset: 5,
    });
    drop(client);

    let ui = pending.recv_with_slow_notice(Duration::from_millis(10), || {
        noticed.store(true, Ordering::SeqCst);
    });
    let server = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        serve(&page, requests).await
    };

    let (response, answered) = tokio::join!(ui, server);
    assert_eq!(answered, 1);
    assert!(matches!(response, Some(InspectorResponse::RootOrigin { .. })));
    assert!(noticed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn errors_are_returned_as_responses() {
    let (page, el) = hello_page();
    let (client, requests) = channel();
    let pending = client.send(InspectorQuery::RootOriginAtChar {
        node: el,
        offset: 500,
    });
    drop(client);

    serve(&page, requests).await;
    let Some(InspectorResponse::Error { message }) = pending.recv().await else {
        panic!("expected an error response");
    };
    assert!(message.contains("outside the rendered text"));
}

#[tokio::test]
async fn newer_selection_wins() {
    let (page, el) = hello_page();
    let (client, requests) = channel();
    let mut selection = Selection::new();

    let first = client.send(InspectorQuery::RootOriginAtChar {
        node: el,
        offset: 5,
    });
    let first_generation = selection.begin(&first);
    let second = client.send(InspectorQuery::RootOriginAtChar {
        node: el,
        offset: 11,
    });
    let second_generation = selection.begin(&second);
    drop(client);

    assert_eq!(serve(&page, requests).await, 1);
    if let Some(response) = first.recv().await {
        assert!(!selection.apply(first_generation, response));
    }
    let response = second.recv().await.unwrap();
    assert!(selection.apply(second_generation, response));

    let Some(InspectorResponse::RootOrigin { step, .. }) = selection.value() else {
        panic!("expected a root origin");
    };
    assert_eq!(step.character(), Some('W'));
}

#[test]
fn responses_serialize_with_type_tag() {
    let (page, el) = hello_page();
    let response = origintrace_core::inspector::handle_query(
        &page,
        &InspectorQuery::RootOriginAtChar {
            node: el,
            offset: 5,
        },
    );
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["type"], "root_origin");
    assert_eq!(json["step"]["action"], "Assign InnerHTML");
    assert_eq!(json["step"]["characterIndex"], 0);
}
