use clap::Parser;

use vapor::ir::{cfg_to_svg, graph_to_string, Graph, GraphBuilder, Op, ENTRY_BLOCK_ID};
use vapor::PartialEscapePhase;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Config {
    /// Sample graph to optimize: straight, diamond, loop or cycle
    sample: String,

    /// Also fold redundant loads and stores on real memory
    #[arg(long)]
    read_elimination: bool,

    /// Render the control flow graph to an svg next to the binary
    #[arg(long)]
    svg: bool,
}

fn straight_sample() -> Graph {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(1);
    let obj = b.new_object(shape);
    let five = b.int(5);
    b.store(obj, 0, five);
    let loaded = b.load(obj, 0);
    b.ret(loaded);
    b.build()
}

fn diamond_sample() -> Graph {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(1);
    let obj = b.new_object(shape);
    let zero = b.int(0);
    b.store(obj, 0, zero);
    let cond = b.param(0);
    b.branch(cond);
    let left = b.block();
    let right = b.block();
    let merge = b.block();
    b.edge(ENTRY_BLOCK_ID, left);
    b.edge(ENTRY_BLOCK_ID, right);
    b.switch_to(left);
    b.call(vec![obj]);
    b.edge(left, merge);
    b.switch_to(right);
    let one = b.int(1);
    b.store(obj, 0, one);
    b.edge(right, merge);
    b.switch_to(merge);
    let loaded = b.load(obj, 0);
    b.ret(loaded);
    b.build()
}

fn loop_sample() -> Graph {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(1);
    let obj = b.new_object(shape);
    let zero = b.int(0);
    b.store(obj, 0, zero);
    let header = b.block();
    let body = b.block();
    let exit = b.block();
    b.edge(ENTRY_BLOCK_ID, header);
    b.switch_to(header);
    let cond = b.param(0);
    b.branch(cond);
    b.edge(header, body);
    b.edge(header, exit);
    b.switch_to(body);
    let current = b.load(obj, 0);
    let one = b.int(1);
    let next = b.binop(Op::Add, current, one);
    b.store(obj, 0, next);
    b.edge(body, header);
    b.switch_to(exit);
    let result = b.load(obj, 0);
    b.ret(result);
    b.loop_info(header, vec![header, body], vec![body], vec![exit]);
    b.build()
}

fn cycle_sample() -> Graph {
    let mut b = GraphBuilder::new();
    let shape = b.shape(vec![vapor::ir::EntryKind::Ref], false, true);
    let first = b.new_object(shape);
    let second = b.new_object(shape);
    b.store(first, 0, second);
    b.store(second, 0, first);
    b.call(vec![first]);
    let zero = b.int(0);
    b.ret(zero);
    b.build()
}

fn main() {
    env_logger::init();

    let config = Config::parse();

    let mut graph = match config.sample.as_str() {
        "straight" => straight_sample(),
        "diamond" => diamond_sample(),
        "loop" => loop_sample(),
        "cycle" => cycle_sample(),
        other => {
            eprintln!("unknown sample '{}'", other);
            std::process::exit(1);
        }
    };

    println!("before:");
    println!("{}", graph_to_string(&graph));

    let mut phase = PartialEscapePhase::new(true, config.read_elimination);
    match phase.run(&mut graph) {
        Ok(changed) => {
            println!("after (changed: {}):", changed);
            println!("{}", graph_to_string(&graph));
        }
        Err(err) => {
            eprintln!("optimization gave up: {}", err);
            std::process::exit(1);
        }
    }

    if config.svg {
        cfg_to_svg(&graph, &config.sample);
    }
}
