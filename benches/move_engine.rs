//! Move engine benchmarks: the win scan and full-game application are on
//! the hot path of every inbound frame.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use uuid::Uuid;

use gomoku::game::board::{Board, Cell};
use gomoku::game::rules::{apply_move, MoveActor};
use gomoku::game::session::GameSession;

fn bench_win_scan(c: &mut Criterion) {
    // A dense mid-game board with no winner.
    let mut board = Board::new();
    for row in 0..15 {
        for col in 0..15 {
            if (row + col) % 3 == 0 {
                let stone = if (row * 15 + col) % 2 == 0 {
                    Cell::Black
                } else {
                    Cell::White
                };
                board.place(row, col, stone);
            }
        }
    }

    c.bench_function("win_scan_center", |b| {
        b.iter(|| black_box(&board).five_through(black_box(7), black_box(7)))
    });

    c.bench_function("win_scan_corner", |b| {
        b.iter(|| black_box(&board).five_through(black_box(0), black_box(0)))
    });
}

fn bench_apply_move(c: &mut Criterion) {
    c.bench_function("apply_first_move", |b| {
        b.iter(|| {
            let mut session = GameSession::new_pvp(Uuid::new_v4(), "a".into(), "b".into());
            apply_move(
                &mut session,
                MoveActor::Human("a"),
                black_box(7),
                black_box(7),
                Utc::now(),
            )
            .unwrap()
        })
    });
}

fn bench_nine_move_win(c: &mut Criterion) {
    let script = [
        ("a", 7, 7),
        ("b", 8, 7),
        ("a", 7, 8),
        ("b", 8, 8),
        ("a", 7, 9),
        ("b", 8, 9),
        ("a", 7, 10),
        ("b", 8, 10),
        ("a", 7, 11),
    ];

    c.bench_function("nine_move_win", |b| {
        b.iter(|| {
            let mut session = GameSession::new_pvp(Uuid::new_v4(), "a".into(), "b".into());
            for (user, row, col) in script {
                apply_move(&mut session, MoveActor::Human(user), row, col, Utc::now()).unwrap();
            }
            black_box(session)
        })
    });
}

criterion_group!(benches, bench_win_scan, bench_apply_move, bench_nine_move_win);
criterion_main!(benches);
