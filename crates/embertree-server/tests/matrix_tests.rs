//! Matrix Routing Tests
//!
//! Tests for connection requests served against the sample tree:
//! - Client requests in relative and qualified form
//! - Announced connection changes and their events
//! - Subscriber updates, suppressed when nothing changed
//! - Locked targets and default source fallback
//! - Administrative routing and its validation

use embertree_core::{
    Element, Error, ItemKind, MatrixConnection, MatrixDisposition, MatrixOperation, Root,
};
use embertree_server::{MatrixEvent, ServerError, ServerEvent, TreeServer};
use embertree_test_utils::{
    attach, client_addr, path, qualified_item, relative_command, relative_item, sample_server,
    subscribe, EventCollector,
};

// ============================================================================
// Utilities
// ============================================================================

fn connections(requests: Vec<MatrixConnection>) -> ItemKind {
    ItemKind::Matrix {
        contents: None,
        connections: requests,
    }
}

fn connect(target: u32, sources: Vec<u32>) -> MatrixConnection {
    MatrixConnection::request(target, sources, MatrixOperation::Connect)
}

fn disconnect(target: u32, sources: Vec<u32>) -> MatrixConnection {
    MatrixConnection::request(target, sources, MatrixOperation::Disconnect)
}

fn sources(server: &TreeServer, matrix: &str, target: u32) -> Vec<u32> {
    server.with_tree(|tree| {
        tree.get(&path(matrix))
            .and_then(Element::as_matrix)
            .map(|m| m.sources(target).to_vec())
            .unwrap_or_default()
    })
}

/// Connection results carried by a matrix response, relative or qualified
fn response_connections(root: &Root) -> Vec<MatrixConnection> {
    let mut item = &root.elements[0];
    while let Some(child) = item.children.first() {
        item = child;
    }
    match &item.kind {
        ItemKind::Matrix { connections, .. } => connections.clone(),
        other => panic!("not a matrix response: {:?}", other),
    }
}

fn matrix_events(events: &[ServerEvent]) -> Vec<(&'static str, MatrixEvent)> {
    events
        .iter()
        .filter_map(|e| e.as_matrix().map(|m| (e.name(), m.clone())))
        .collect()
}

// ============================================================================
// Client Requests
// ============================================================================

#[test]
fn test_one_to_one_switch_moves_source() {
    let server = sample_server();
    let (router_rec, router) = attach(&server, 5001);
    let (panel_rec, panel) = attach(&server, 5002);
    server.handle_request(&router, &relative_command("1.0", subscribe()));
    server.handle_request(&panel, &relative_command("1.0", subscribe()));
    let mut events = EventCollector::new(server.events());

    let resolved = server.handle_request(
        &router,
        &relative_item("1.0", connections(vec![connect(1, vec![0])])),
    );
    assert_eq!(resolved.as_deref(), Some("1.0"));
    assert!(sources(&server, "1.0", 0).is_empty());
    assert_eq!(sources(&server, "1.0", 1), vec![0]);

    let events = events.drain();
    let announced = matrix_events(&events);
    assert_eq!(announced.len(), 2);
    assert_eq!(announced[0].0, "matrix-disconnect");
    assert_eq!(announced[0].1.target, 0);
    assert_eq!(announced[0].1.sources, vec![0]);
    assert_eq!(announced[1].0, "matrix-connect");
    assert_eq!(announced[1].1.target, 1);
    assert_eq!(announced[1].1.client, Some(client_addr(5001)));
    assert_eq!(events.last().map(ServerEvent::name), Some("request"));

    // requester: relative answer with both touched targets
    let answers = router_rec.take();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].elements[0].number, Some(1));
    let results = response_connections(&answers[0]);
    let targets: Vec<u32> = results.iter().map(|c| c.target).collect();
    assert_eq!(targets, vec![0, 1]);
    assert!(results
        .iter()
        .all(|c| c.disposition == Some(MatrixDisposition::Modified)));

    // other subscriber: one update in the same shape
    let pushes = panel_rec.take();
    assert_eq!(pushes.len(), 1);
    assert_eq!(response_connections(&pushes[0]), results);
}

#[test]
fn test_qualified_request_answers_qualified() {
    let server = sample_server();
    let (recorder, session) = attach(&server, 5001);

    server.handle_request(
        &session,
        &qualified_item("1.1", connections(vec![connect(0, vec![0, 1])])),
    );

    let answer = recorder.last().unwrap();
    assert_eq!(answer.elements[0].path, Some(path("1.1")));
    let results = response_connections(&answer);
    assert_eq!(results[0].sources, vec![0, 1]);
    assert_eq!(results[0].disposition, Some(MatrixDisposition::Modified));
}

#[test]
fn test_tally_is_answered_but_not_pushed() {
    let server = sample_server();
    let (requester_rec, requester) = attach(&server, 5001);
    let (watcher_rec, watcher) = attach(&server, 5002);
    server.handle_request(&watcher, &relative_command("1.1", subscribe()));
    let mut events = EventCollector::new(server.events());

    // three sources exceed the per-target limit of two
    server.handle_request(
        &requester,
        &relative_item("1.1", connections(vec![connect(1, vec![0, 1, 2])])),
    );

    let results = response_connections(&requester_rec.last().unwrap());
    assert_eq!(results[0].disposition, Some(MatrixDisposition::Tally));
    assert!(results[0].sources.is_empty());
    assert_eq!(watcher_rec.count(), 0);
    assert!(matrix_events(&events.drain()).is_empty());
}

#[test]
fn test_n_to_n_total_limit() {
    let server = sample_server();
    let (recorder, session) = attach(&server, 5001);

    server.handle_request(
        &session,
        &relative_item("1.1", connections(vec![connect(0, vec![0, 1]), connect(1, vec![2])])),
    );
    let results = response_connections(&recorder.take()[0]);
    assert!(results
        .iter()
        .all(|c| c.disposition == Some(MatrixDisposition::Modified)));

    // a fourth connection exceeds the total of three
    server.handle_request(
        &session,
        &relative_item("1.1", connections(vec![connect(1, vec![0])])),
    );
    let results = response_connections(&recorder.take()[0]);
    assert_eq!(results[0].disposition, Some(MatrixDisposition::Tally));
    assert_eq!(sources(&server, "1.1", 1), vec![2]);
}

#[test]
fn test_locked_target_is_reported() {
    let server = sample_server();
    let (recorder, session) = attach(&server, 5001);

    server.handle_request(
        &session,
        &relative_item("1.0", connections(vec![connect(3, vec![1])])),
    );

    let results = response_connections(&recorder.last().unwrap());
    assert_eq!(results[0].disposition, Some(MatrixDisposition::Locked));
    assert!(results[0].locked);
    assert_eq!(sources(&server, "1.0", 3), vec![3]);
}

#[test]
fn test_one_to_n_disconnect_uses_default_source() {
    let server = sample_server();
    let (recorder, session) = attach(&server, 5001);
    let mut events = EventCollector::new(server.events());

    server.handle_request(
        &session,
        &relative_item("1.2", connections(vec![disconnect(0, vec![2])])),
    );
    assert_eq!(sources(&server, "1.2", 0), vec![1]);
    let announced = matrix_events(&events.drain());
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].0, "matrix-disconnect");
    assert_eq!(announced[0].1.sources, vec![2]);

    // target 1 has no default and keeps its source
    server.handle_request(
        &session,
        &relative_item("1.2", connections(vec![disconnect(1, vec![3])])),
    );
    assert_eq!(sources(&server, "1.2", 1), vec![3]);
    let results = response_connections(&recorder.last().unwrap());
    assert_eq!(results[0].disposition, Some(MatrixDisposition::Tally));
}

#[test]
fn test_disconnect_of_empty_target_is_a_no_op() {
    let server = sample_server();
    let (recorder, session) = attach(&server, 5001);
    let mut events = EventCollector::new(server.events());

    server.handle_request(
        &session,
        &relative_item("1.1", connections(vec![disconnect(0, vec![1])])),
    );

    let results = response_connections(&recorder.last().unwrap());
    assert_eq!(results[0].disposition, Some(MatrixDisposition::Tally));
    assert!(matrix_events(&events.drain()).is_empty());
}

// ============================================================================
// Administrative API
// ============================================================================

#[test]
fn test_admin_routing_updates_subscribers_silently() {
    let server = sample_server();
    let (recorder, session) = attach(&server, 5001);
    server.handle_request(&session, &relative_command("1.0", subscribe()));
    let mut events = EventCollector::new(server.events());

    let outcome = server.matrix_connect(&path("1.0"), 2, &[1]).unwrap();
    assert!(outcome.has_updates());
    assert_eq!(sources(&server, "1.0", 2), vec![1]);
    assert!(events.drain().is_empty());

    let pushes = recorder.take();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].elements[0].number, Some(1));
    assert_eq!(response_connections(&pushes[0])[0].sources, vec![1]);

    let outcome = server.matrix_disconnect(&path("1.0"), 2, &[1]).unwrap();
    assert!(outcome.has_updates());
    assert!(sources(&server, "1.0", 2).is_empty());

    let outcome = server.matrix_set(&path("1.2"), 2, &[3]).unwrap();
    assert!(outcome.has_updates());
    assert_eq!(sources(&server, "1.2", 2), vec![3]);
}

#[test]
fn test_admin_routing_validation() {
    let server = sample_server();

    assert!(matches!(
        server.matrix_set(&path("1.0"), 9, &[0]),
        Err(ServerError::Core(Error::MatrixValidation { .. }))
    ));
    assert!(matches!(
        server.matrix_connect(&path("0.0"), 0, &[0]),
        Err(ServerError::Core(Error::MatrixValidation { .. }))
    ));
    assert!(matches!(
        server.matrix_disconnect(&path("5"), 0, &[0]),
        Err(ServerError::Core(Error::PathNotFound(_)))
    ));
}
