use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mlm_eng::{Amount, Command, Engine, MemberId};

const FEE: Amount = Amount::units(100);

/// Generates join commands for benchmarking.
///
/// Member 1 is seeded as the only root. Every following member is invited by
/// `member / fan_in`, so a fan-in of 1 always invites through member 1 and
/// spills deep, while larger values spread invitations across the tree.
pub struct JoinGenerator {
    next_member: MemberId,
    last_member: MemberId,
    fan_in: MemberId,
}

impl JoinGenerator {
    pub fn new(members: MemberId, fan_in: MemberId) -> Self {
        Self {
            next_member: 1,
            last_member: members,
            fan_in: fan_in.max(1),
        }
    }
}

impl Iterator for JoinGenerator {
    type Item = Command;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_member > self.last_member {
            return None;
        }
        let member = self.next_member;
        self.next_member += 1;

        if member == 1 {
            return Some(Command::Seed { member });
        }
        let inviter = if self.fan_in == 1 {
            1
        } else {
            (member / self.fan_in).max(1)
        };
        Some(Command::Join {
            member,
            inviter,
            payment: FEE,
        })
    }
}

fn build(members: MemberId, fan_in: MemberId) -> Engine {
    let mut engine = Engine::new();
    for command in JoinGenerator::new(members, fan_in) {
        let _ = engine.apply(command);
    }
    engine
}

fn bench_root_invitations(c: &mut Criterion) {
    let mut group = c.benchmark_group("root_invitations");

    // every member invited by the root, so each placement searches from the top
    for count in [100u32, 1_000, 5_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| black_box(build(count, 1)));
        });
    }

    group.finish();
}

fn bench_spread_invitations(c: &mut Criterion) {
    let mut group = c.benchmark_group("spread_invitations");

    for (count, fan_in) in [(10_000u32, 2u32), (10_000, 3), (50_000, 3)] {
        let label = format!("{count}m_fan{fan_in}");
        group.bench_with_input(
            BenchmarkId::from_parameter(&label),
            &(count, fan_in),
            |b, &(count, fan_in)| {
                b.iter(|| black_box(build(count, fan_in)));
            },
        );
    }

    group.finish();
}

fn bench_relocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("relocation");
    group.sample_size(20);

    // move member 2 (a third of the tree) to a new root and back
    group.bench_function("subtree_round_trip_3k", |b| {
        let mut engine = build(3_000, 1);
        b.iter(|| {
            let _ = black_box(engine.relocate(2, None));
            let _ = black_box(engine.relocate(2, Some(1)));
        });
    });

    group.finish();
}

fn bench_audit(c: &mut Criterion) {
    let engine = build(20_000, 3);
    c.bench_function("audit_20k", |b| b.iter(|| black_box(engine.audit())));
}

criterion_group!(
    benches,
    bench_root_invitations,
    bench_spread_invitations,
    bench_relocation,
    bench_audit,
);

criterion_main!(benches);
