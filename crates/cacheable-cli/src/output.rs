use colored::Colorize;

use cacheable::CacheStats;

pub fn print_step(msg: &str) {
    println!("{} {}", "→".cyan(), msg);
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_stats(stats: &CacheStats) {
    println!(
        "{}: hits={} misses={} promotions={} backend_errors={} hit_rate={:.1}%",
        "Stats".cyan(),
        stats.hits,
        stats.misses,
        stats.promotions,
        stats.backend_errors,
        stats.hit_rate()
    );
}
