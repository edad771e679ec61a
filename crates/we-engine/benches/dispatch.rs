use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use we_engine::{Buffer, Opcode, Table, Value, Vm};

/// Sum `n..1` in a loop: r1 = sum, r2 = counter
fn countdown(n: i32) -> Rc<[u8]> {
    let op = |o: Opcode| o.to_u8();
    let num32 = |v: i32| {
        let mut out = vec![op(Opcode::Num) | 0x80];
        out.extend_from_slice(&v.to_be_bytes());
        out
    };

    let mut code = Vec::new();
    code.extend(num32(0));
    code.extend(num32(n));
    let top = code.len();
    code.extend([op(Opcode::Mov), 2, op(Opcode::Brz), 0, 0, 0, 0]);
    let exit = code.len() - 4;
    code.extend([
        op(Opcode::Mov),
        1,
        op(Opcode::Mov),
        2,
        op(Opcode::Add),
        op(Opcode::Pop),
        1,
        op(Opcode::Mov),
        2,
        op(Opcode::Num),
        1,
        op(Opcode::Sub),
        op(Opcode::Pop),
        2,
        op(Opcode::Jmp),
    ]);
    let back = top as i32 - (code.len() as i32 + 4);
    code.extend_from_slice(&back.to_be_bytes());
    let end = code.len();
    code.push(op(Opcode::Hlt));
    let forward = end as i32 - (exit as i32 + 4);
    code[exit..exit + 4].copy_from_slice(&forward.to_be_bytes());
    Rc::from(code)
}

fn bench_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    for n in [100, 10_000] {
        let program = countdown(n);
        group.bench_with_input(BenchmarkId::new("countdown", n), &program, |b, program| {
            b.iter(|| {
                let mut vm = Vm::create(8).unwrap();
                vm.push_buffer(Rc::clone(program)).unwrap();
                vm.call(&mut ()).unwrap();
                black_box(vm.read_number(1).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_table(c: &mut Criterion) {
    let keys: Vec<Value> = (0..1024)
        .map(|i| Value::Buffer(Buffer::copy_from(format!("key-{}", i).as_bytes()).unwrap()))
        .collect();

    c.bench_function("table_insert_1024", |b| {
        b.iter(|| {
            let mut table = Table::new();
            for (i, key) in keys.iter().enumerate() {
                table.set(key, Value::Number(i as i64), None).unwrap();
            }
            black_box(table.len())
        });
    });

    let mut table = Table::new();
    for (i, key) in keys.iter().enumerate() {
        table.set(key, Value::Number(i as i64), None).unwrap();
    }
    c.bench_function("table_lookup_1024", |b| {
        b.iter(|| {
            let mut hits = 0;
            for key in &keys {
                if table.lookup(black_box(key)).is_some() {
                    hits += 1;
                }
            }
            hits
        });
    });
}

criterion_group!(benches, bench_loop, bench_table);
criterion_main!(benches);
